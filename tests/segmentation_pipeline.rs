// 该文件是 Shijue （视觉） 项目的一部分。
// tests/segmentation_pipeline.rs - 分割流程集成测试
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

use image::{Rgb, RgbImage};
use shijue::{
  FromUrl,
  blob::Blob,
  engine::{EngineError, TensorDumpEngine, write_tensor_dump},
  frame::Frame,
  input::InputWrapper,
  model::{
    DEEPLAB_CLASS_NUM, DeepLabConfig, DeepLabV3Plus, DeepLabV3PlusBuilder, Model, ModelError,
    VocLabel, WithLabel, WithPalette,
  },
  output::OutputWrapper,
  task::{ContinuousTask, Task},
};
use url::Url;

/// 左半边为 person（15），右半边为背景
fn half_person(size: usize) -> Vec<f32> {
  let frame = size * size;
  let mut output = vec![0.0; DEEPLAB_CLASS_NUM * frame];
  for row in 0..size {
    for col in 0..size / 2 {
      output[15 * frame + row * size + col] = 0.9;
    }
  }
  output
}

#[test]
fn closure_engine_to_class_mask() {
  let size = 32;
  let output = half_person(size);
  let engine = move |blob: &Blob| -> Result<Box<[f32]>, EngineError> {
    assert_eq!(blob.shape(), [3, 32, 32]);
    Ok(output.clone().into_boxed_slice())
  };
  let model = DeepLabV3Plus::new(
    engine,
    DeepLabConfig {
      input_size: 32,
      ..Default::default()
    },
  );

  let frame = Frame::new(RgbImage::from_pixel(200, 100, Rgb([10, 20, 30])));
  let result = model.infer(&frame).unwrap();

  assert_eq!((result.mask.width, result.mask.height), (32, 32));
  assert_eq!(result.class_at(0, 31).unwrap().to_label_str(), "person");
  assert_eq!(result.class_at(16, 0).unwrap().to_label_id(), 0);

  let counts = result.class_counts();
  assert_eq!(counts[15], 32 * 16);
  assert_eq!(counts[0], 32 * 16);
  assert_eq!(counts.iter().sum::<usize>(), 32 * 32);
}

#[test]
fn all_zero_output_is_background() {
  let model = DeepLabV3Plus::new(
    TensorDumpEngine::from_output(vec![0.0; DEEPLAB_CLASS_NUM * 512 * 512]),
    DeepLabConfig::default(),
  );
  let result = model
    .infer(&Frame::new(RgbImage::new(640, 480)))
    .unwrap();
  assert!(result.mask.data.iter().all(|&c| c == 0));
  assert_eq!(result.present_classes().len(), 1);
}

#[test]
fn mismatched_output_is_fatal() {
  let model = DeepLabV3Plus::new(
    TensorDumpEngine::from_output(vec![0.0; 20 * 16 * 16]),
    DeepLabConfig {
      input_size: 16,
      ..Default::default()
    },
  );
  assert!(matches!(
    model.infer(&Frame::new(RgbImage::new(16, 16))),
    Err(ModelError::OutputShapeMismatch { .. })
  ));
}

#[test]
fn directory_in_overlay_out() {
  let dir = tempfile::tempdir().unwrap();
  let inputs = dir.path().join("frames");
  std::fs::create_dir(&inputs).unwrap();
  for i in 0..3 {
    RgbImage::from_pixel(64, 64, Rgb([255, 255, 255]))
      .save(inputs.join(format!("frame-{}.png", i)))
      .unwrap();
  }

  let dump = dir.path().join("seg.bin");
  write_tensor_dump(&dump, &half_person(16)).unwrap();
  let model_url = Url::parse(&format!("deeplab://{}?size=16&alpha=255", dump.display())).unwrap();
  let model = DeepLabV3PlusBuilder::from_url(&model_url)
    .unwrap()
    .build()
    .unwrap();

  let input = InputWrapper::from_url(&Url::parse(&format!("folder://{}", inputs.display())).unwrap())
    .unwrap();
  let records = dir.path().join("records");
  let output =
    OutputWrapper::from_url(&Url::parse(&format!("folder://{}", records.display())).unwrap())
      .unwrap();

  ContinuousTask::default()
    .with_frame_number(Some(2))
    .run_task(input, model, output)
    .unwrap();

  let saved: Vec<_> = walkdir::WalkDir::new(&records)
    .into_iter()
    .filter_map(Result::ok)
    .filter(|e| e.file_type().is_file())
    .map(|e| e.into_path())
    .collect();
  assert_eq!(saved.len(), 2);

  let person = VocLabel::from_label_id(15).color();
  for path in saved {
    let image = image::open(&path).unwrap().to_rgb8();
    assert_eq!(image.dimensions(), (64, 64));
    assert_eq!(image.get_pixel(5, 30), &Rgb(person));
    assert_eq!(image.get_pixel(60, 30), &Rgb([0, 0, 0]));
  }
}
