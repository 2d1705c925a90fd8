// 该文件是 Jiannan （剑南春雨） 项目的一部分。
// src/model/yolov5.rs - YOLOv5 检测模型
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use rknpu::{Context, InitFlags, TensorType};
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl,
  frame::RgbNhwcFrame,
  input::AsNhwcFrame,
  model::{
    DetectResult, Model,
    postprocess::{DecodeError, PostprocessConfig, decode_candidates, non_max_suppression},
  },
};

const YOLOV5_NUM_INPUTS: u32 = 1;
const YOLOV5_NUM_OUTPUTS: u32 = 1;
const YOLOV5_CLASS_NUM: usize = 80;
const YOLOV5_INPUT_SIZE: u32 = 640;
const YOLOV5_DEFAULT_SCORE_THRESH: f32 = 0.3;
const YOLOV5_DEFAULT_IOU_THRESH: f32 = 0.45;

/// 以 640x640 NHWC 帧为输入的 YOLOv5 模型
pub type Yolov5Nhwc = Yolov5<RgbNhwcFrame<YOLOV5_INPUT_SIZE, YOLOV5_INPUT_SIZE>>;

pub struct Yolov5<Frame> {
  context: Context,
  score_threshold: f32,
  iou_threshold: f32,
  _phantom: std::marker::PhantomData<Frame>,
}

#[derive(Error, Debug)]
pub enum Yolov5Error {
  #[error("模型加载错误: {0}")]
  ModelLoadError(std::io::Error),
  #[error("模型无效: {0}, 错误: {1}")]
  ModelInvalid(String, rknpu::Error),
  #[error("RKNN 错误: {0}")]
  RknnError(rknpu::Error),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("阈值参数错误: {0}")]
  ThresholdError(String),
  #[error("输出解码错误: {0}")]
  DecodeError(#[from] DecodeError),
}

impl From<std::io::Error> for Yolov5Error {
  fn from(err: std::io::Error) -> Self {
    Yolov5Error::ModelLoadError(err)
  }
}

impl From<rknpu::Error> for Yolov5Error {
  fn from(err: rknpu::Error) -> Self {
    Yolov5Error::RknnError(err)
  }
}

impl Yolov5Error {
  pub fn invalid(msg: &str, e: rknpu::Error) -> Self {
    Yolov5Error::ModelInvalid(msg.to_string(), e)
  }
}

pub struct Yolov5Builder {
  model_path: String,
  flags: InitFlags,
  score_threshold: f32,
  iou_threshold: f32,
}

const YOLOV5_SCHEME: &str = "yolov5";

fn parse_threshold(name: &str, value: &str) -> Result<f32, Yolov5Error> {
  let threshold: f32 = value
    .parse()
    .map_err(|_| Yolov5Error::ThresholdError(format!("{} 不是浮点数: {}", name, value)))?;
  if !(0.0..=1.0).contains(&threshold) {
    return Err(Yolov5Error::ThresholdError(format!(
      "{} 超出 [0, 1] 范围: {}",
      name, threshold
    )));
  }
  Ok(threshold)
}

impl FromUrl for Yolov5Builder {
  type Error = Yolov5Error;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != YOLOV5_SCHEME {
      return Err(Yolov5Error::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        YOLOV5_SCHEME
      )));
    }

    let mut builder = Yolov5Builder {
      model_path: url.path().to_string(),
      flags: InitFlags::default(),
      score_threshold: YOLOV5_DEFAULT_SCORE_THRESH,
      iou_threshold: YOLOV5_DEFAULT_IOU_THRESH,
    };

    for (key, value) in url.query_pairs() {
      match key.as_ref() {
        "score" => builder.score_threshold = parse_threshold("score", &value)?,
        "iou" => builder.iou_threshold = parse_threshold("iou", &value)?,
        _ => {}
      }
    }

    Ok(builder)
  }
}

impl Yolov5Builder {
  pub fn flags(mut self, flags: InitFlags) -> Self {
    self.flags = flags;
    self
  }

  pub fn score_threshold(mut self, threshold: f32) -> Self {
    self.score_threshold = threshold;
    self
  }

  pub fn iou_threshold(mut self, threshold: f32) -> Self {
    self.iou_threshold = threshold;
    self
  }

  pub fn build<Frame>(self) -> Result<Yolov5<Frame>, Yolov5Error> {
    info!("加载模型文件: {}", self.model_path);
    let model_data = std::fs::read(&self.model_path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );

    info!("创建 RKNN 推理上下文");
    let context = Context::new(&model_data, self.flags)?;
    info!("模型加载完成");

    match context.sdk_version() {
      Ok(version) => {
        if let Ok(api_ver) = version.api_version() {
          debug!("模型 API 版本: {}", api_ver);
        }
        if let Ok(drv_ver) = version.driver_version() {
          debug!("模型驱动版本: {}", drv_ver);
        }
      }
      Err(e) => {
        error!("查询 SDK 版本失败: {}", e);
        return Err(Yolov5Error::invalid("无法查询 SDK 版本", e));
      }
    }

    let num_inputs = context
      .num_inputs()
      .map_err(|e| Yolov5Error::invalid("无法获取输入数量", e))?;
    let num_outputs = context
      .num_outputs()
      .map_err(|e| Yolov5Error::invalid("无法获取输出数量", e))?;

    if num_inputs != YOLOV5_NUM_INPUTS {
      error!(
        "预期模型输入数量为 {}, 实际为 {}",
        YOLOV5_NUM_INPUTS, num_inputs
      );
      return Err(Yolov5Error::invalid(
        &format!(
          "预期模型输入数量为 {}, 实际为 {}",
          YOLOV5_NUM_INPUTS, num_inputs
        ),
        rknpu::Error::InvalidModel,
      ));
    }

    if num_outputs != YOLOV5_NUM_OUTPUTS {
      error!(
        "预期模型输出数量为 {}, 实际为 {}",
        YOLOV5_NUM_OUTPUTS, num_outputs
      );
      return Err(Yolov5Error::invalid(
        &format!(
          "预期模型输出数量为 {}, 实际为 {}",
          YOLOV5_NUM_OUTPUTS, num_outputs
        ),
        rknpu::Error::InvalidModel,
      ));
    }

    debug!("模型输入数量: {}", num_inputs);
    debug!("模型输出数量: {}", num_outputs);
    debug!(
      "置信度阈值: {}, NMS IoU 阈值: {}",
      self.score_threshold, self.iou_threshold
    );

    let _phantom = std::marker::PhantomData::<Frame>;
    Ok(Yolov5 {
      context,
      score_threshold: self.score_threshold,
      iou_threshold: self.iou_threshold,
      _phantom,
    })
  }
}

impl<Frame: AsNhwcFrame<YOLOV5_INPUT_SIZE, YOLOV5_INPUT_SIZE>> Model for Yolov5<Frame> {
  type Input = Frame;
  type Output = DetectResult;
  type Error = Yolov5Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    // 设置输入
    debug!("设置模型输入");
    self.context.set_input(
      0,
      input.as_nhwc(),
      rknpu::TensorFormat::NHWC,
      TensorType::UInt8,
    )?;

    // 执行推理
    debug!("执行模型推理");
    self.context.run()?;

    // 获取输出
    debug!("获取模型输出");
    let output = self.context.get_outputs()?;

    self.postprocess(output)
  }

  /// 后处理: 平铺候选行解码 + 按类别非极大值抑制
  ///
  /// YOLOv5 导出模型只有一个输出张量，每行
  /// `[cx, cy, w, h, objectness, 80 类分数]`，坐标为归一化值。
  fn postprocess(&self, output: rknpu::Output) -> Result<Self::Output, Self::Error> {
    debug!("后处理模型输出");

    let tensor = output.get_f32(0)?;

    let config = PostprocessConfig {
      num_classes: YOLOV5_CLASS_NUM,
      score_threshold: self.score_threshold,
      iou_threshold: self.iou_threshold,
    };

    let candidates = decode_candidates(tensor, &config)?;
    let items = non_max_suppression(candidates, config.iou_threshold);

    debug!("检测到 {} 个物体", items.len());
    debug!("检测结果: {:?}", items);

    Ok(DetectResult {
      items: items.into_boxed_slice(),
    })
  }
}
