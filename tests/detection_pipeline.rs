// 该文件是 Shijue （视觉） 项目的一部分。
// tests/detection_pipeline.rs - 检测流程集成测试
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

use std::sync::{Arc, Mutex};

use image::{Rgb, RgbImage};
use shijue::{
  FromUrl,
  blob::{Blob, BlobError},
  engine::{EngineError, TensorDumpEngine, write_tensor_dump},
  frame::Frame,
  input::InputWrapper,
  model::{
    Model, ModelError, NmsOrder, WithLabel, YOLOV5_CLASS_NUM, YoloV5, YoloV5Builder, YoloV5Config,
    yolov5_anchor_num,
  },
  output::OutputWrapper,
  task::{OneShotTask, Task},
};
use url::Url;

const ROW: usize = 5 + YOLOV5_CLASS_NUM;

/// 全零输出，指定行写入检测
fn output_with(size: u32, rows: &[(usize, [f32; 5], usize, f32)]) -> Vec<f32> {
  let mut output = vec![0.0; yolov5_anchor_num(size) * ROW];
  for &(index, params, class, score) in rows {
    let row = &mut output[index * ROW..(index + 1) * ROW];
    row[..5].copy_from_slice(&params);
    row[5 + class] = score;
  }
  output
}

fn gray_frame(width: u32, height: u32) -> Frame {
  Frame::new(RgbImage::from_pixel(width, height, Rgb([90, 90, 90])))
}

#[test]
fn full_size_output_below_threshold_gives_empty_result() {
  let mut output = vec![0.0; 25200 * ROW];
  for row in output.chunks_exact_mut(ROW) {
    row[4] = 0.44;
    row[5] = 0.99;
  }
  let model = YoloV5::new(
    TensorDumpEngine::from_output(output),
    YoloV5Config::default(),
  )
  .unwrap();

  let result = model.infer(&gray_frame(1280, 720)).unwrap();
  assert!(result.is_empty());
  assert_eq!(result.input_size, 640);
}

#[test]
fn overlapping_boxes_follow_nms_order() {
  let rows = [
    (10, [100.0, 100.0, 40.0, 40.0, 0.9], 0, 0.95),
    (20, [102.0, 101.0, 40.0, 40.0, 0.9], 0, 0.85),
    (30, [300.0, 300.0, 50.0, 30.0, 0.6], 2, 0.9),
  ];
  let output = output_with(640, &rows);

  let ascending = YoloV5::new(
    TensorDumpEngine::from_output(output.clone()),
    YoloV5Config::default(),
  )
  .unwrap();
  let result = ascending.postprocess(&output).unwrap();
  let mut scores: Vec<f32> = result.items.iter().map(|i| i.score).collect();
  scores.sort_by(f32::total_cmp);
  assert_eq!(scores, vec![0.85, 0.9]);

  let descending = YoloV5::new(
    TensorDumpEngine::from_output(output.clone()),
    YoloV5Config {
      nms_order: NmsOrder::Descending,
      ..Default::default()
    },
  )
  .unwrap();
  let result = descending.postprocess(&output).unwrap();
  let mut scores: Vec<f32> = result.items.iter().map(|i| i.score).collect();
  scores.sort_by(f32::total_cmp);
  assert_eq!(scores, vec![0.9, 0.95]);

  let car = result
    .items
    .iter()
    .find(|i| i.kind.to_label_id() == 2)
    .unwrap();
  assert_eq!(car.kind.to_label_str(), "car");
  assert_eq!(
    (car.bbox.x0, car.bbox.y0, car.bbox.x1, car.bbox.y1),
    (275, 285, 325, 315)
  );
}

#[test]
fn engine_receives_normalized_planar_blob() {
  let seen: Arc<Mutex<Option<(Vec<usize>, f32, f32, f32)>>> = Arc::new(Mutex::new(None));
  let output = output_with(320, &[]);
  let engine = {
    let seen = seen.clone();
    move |blob: &Blob| -> Result<Box<[f32]>, EngineError> {
      *seen.lock().unwrap() = Some((
        blob.shape().to_vec(),
        blob.get(0, 5, 5).unwrap_or(-1.0),
        blob.get(1, 5, 5).unwrap_or(-1.0),
        blob.get(2, 5, 5).unwrap_or(-1.0),
      ));
      Ok(output.clone().into_boxed_slice())
    }
  };

  let model = YoloV5::new(
    engine,
    YoloV5Config {
      input_size: 320,
      ..Default::default()
    },
  )
  .unwrap();
  let frame = Frame::new(RgbImage::from_pixel(100, 50, Rgb([255, 0, 51])));
  let result = model.infer(&frame).unwrap();
  assert!(result.is_empty());

  let (shape, r, g, b) = seen.lock().unwrap().clone().unwrap();
  assert_eq!(shape, vec![3, 320, 320]);
  assert!((r - 1.0).abs() < 1e-6);
  assert_eq!(g, 0.0);
  assert!((b - 0.2).abs() < 1e-6);
}

#[test]
fn wrong_output_size_is_reported() {
  let engine = TensorDumpEngine::from_output(vec![0.0; 100]);
  let model = YoloV5::new(engine, YoloV5Config::default()).unwrap();
  assert!(matches!(
    model.infer(&gray_frame(64, 64)),
    Err(ModelError::OutputShapeMismatch { actual: 100, .. })
  ));
}

#[test]
fn dump_file_to_rendered_image() {
  let dir = tempfile::tempdir().unwrap();

  let source = dir.path().join("input.png");
  RgbImage::from_pixel(640, 480, Rgb([30, 30, 30]))
    .save(&source)
    .unwrap();

  let dump = dir.path().join("yolo.bin");
  let output = output_with(320, &[(5, [160.0, 160.0, 64.0, 64.0, 0.8], 0, 0.93)]);
  write_tensor_dump(&dump, &output).unwrap();

  let model_url = Url::parse(&format!("yolov5://{}?size=320", dump.display())).unwrap();
  let model = YoloV5Builder::from_url(&model_url).unwrap().build().unwrap();

  let input = InputWrapper::from_url(&Url::parse(&format!("image://{}", source.display())).unwrap())
    .unwrap();
  let rendered = dir.path().join("out").join("result.png");
  let output =
    OutputWrapper::from_url(&Url::parse(&format!("image://{}", rendered.display())).unwrap())
      .unwrap();

  OneShotTask.run_task(input, model, output).unwrap();

  let image = image::open(&rendered).unwrap().to_rgb8();
  assert_eq!(image.dimensions(), (640, 480));
  // 框 (128,128)-(192,192) 映射到源图为 (256,192)-(384,288)
  assert_eq!(image.get_pixel(256, 240), &Rgb([0, 255, 136]));
  assert_eq!(image.get_pixel(320, 240), &Rgb([30, 30, 30]));
}

#[test]
fn builder_rejects_dump_with_wrong_length() {
  let dir = tempfile::tempdir().unwrap();
  let dump = dir.path().join("short.bin");
  write_tensor_dump(&dump, &[0.0; 85]).unwrap();

  let url = Url::parse(&format!("yolov5://{}", dump.display())).unwrap();
  assert!(matches!(
    YoloV5Builder::from_url(&url).unwrap().build(),
    Err(ModelError::OutputShapeMismatch { .. })
  ));
}

#[test]
fn empty_source_frame_is_rejected() {
  let model = YoloV5::new(
    TensorDumpEngine::from_output(output_with(320, &[])),
    YoloV5Config {
      input_size: 320,
      ..Default::default()
    },
  )
  .unwrap();

  for (width, height) in [(0, 0), (0, 10), (10, 0)] {
    assert!(matches!(
      model.infer(&gray_frame(width, height)),
      Err(ModelError::Blob(BlobError::Empty))
    ));
  }
}

#[test]
fn backend_failure_reaches_caller() {
  let engine = |_: &Blob| -> Result<Box<[f32]>, EngineError> {
    Err(EngineError::Backend("设备未就绪".into()))
  };
  let model = YoloV5::new(engine, YoloV5Config::default()).unwrap();

  let error = model.infer(&gray_frame(64, 64)).unwrap_err();
  assert!(matches!(
    error,
    ModelError::Engine(EngineError::Backend(_))
  ));
  assert!(error.to_string().contains("设备未就绪"));
}
