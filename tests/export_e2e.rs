use ndarray::{ArrayD, IxDyn};

use probehub::{
    Annotations, Exporter, ImageClassificationExporter, Modality, ObjectDetectionExporter, Sample,
    SampleOptions, So2SatExporter, VideoClassificationExporter, VideoTrackingExporter,
};

const NUM_FRAMES: usize = 10;

fn pseudo_random(shape: &[usize]) -> ArrayD<f32> {
    let mut n = 0usize;
    ArrayD::from_shape_simple_fn(IxDyn(shape), || {
        n += 1;
        ((n * 7919) % 1000) as f32 / 1000.0
    })
}

fn obj_det_y() -> Annotations {
    Annotations::new()
        .with_labels(vec![1])
        .with_boxes(vec![[0.0, 0.0, 1.0, 1.0]])
        .with_image_id(1)
}

fn obj_det_y_pred() -> Annotations {
    Annotations::new()
        .with_scores(vec![1.0])
        .with_labels(vec![1])
        .with_boxes(vec![[0.0, 0.0, 1.0, 1.0]])
}

fn tracking_boxes() -> Annotations {
    Annotations::new().with_boxes(vec![[1.0, 1.0, 1.0, 1.0]; NUM_FRAMES])
}

#[test]
fn image_classification_sample_is_single_image() {
    let dir = tempfile::tempdir().unwrap();
    let exporter = ImageClassificationExporter::new(dir.path());
    let img = exporter.get_sample(pseudo_random(&[32, 32, 3]).view()).unwrap();
    assert_eq!((img.width(), img.height()), (32, 32));

    // get_sample never creates the output directory.
    assert!(!exporter.output_dir().exists());
}

#[test]
fn object_detection_sample_with_and_without_annotations() {
    let dir = tempfile::tempdir().unwrap();
    let exporter = ObjectDetectionExporter::new(dir.path());
    let x = pseudo_random(&[32, 32, 3]);
    let (y, y_pred) = (obj_det_y(), obj_det_y_pred());

    let cases = [
        (None, None, false),
        (Some(&y), Some(&y_pred), true),
        (Some(&y), None, true),
        (None, Some(&y_pred), true),
    ];
    for (y_i, y_i_pred, with_boxes) in cases {
        let img = exporter.get_sample(x.view(), y_i, y_i_pred, with_boxes).unwrap();
        assert_eq!((img.width(), img.height()), (32, 32));

        if y_i.is_some() {
            let (gt, pred) = exporter.get_coco_formatted_bounding_box_data(y_i, y_i_pred);
            assert_eq!(gt.len(), 1);
            assert_eq!(pred.len(), usize::from(y_i_pred.is_some()));
        }
    }
}

#[test]
fn coco_boxes_are_xywh() {
    let dir = tempfile::tempdir().unwrap();
    let exporter = ObjectDetectionExporter::new(dir.path());
    let y = Annotations::new()
        .with_boxes(vec![[0.25, 0.5, 0.75, 1.0]])
        .with_labels(vec![3])
        .with_image_id(9);
    let (gt, pred) = exporter.get_coco_formatted_bounding_box_data(Some(&y), None);
    assert!(pred.is_empty());
    assert_eq!(gt[0].image_id, Some(9));
    assert_eq!(gt[0].category_id, 3);
    assert_eq!(gt[0].bbox, [0.25, 0.5, 0.5, 0.5]);
}

#[test]
fn video_samples_have_one_image_per_frame() {
    let dir = tempfile::tempdir().unwrap();
    let x = pseudo_random(&[NUM_FRAMES, 32, 32, 3]);

    let classification = VideoClassificationExporter::new(dir.path(), 10);
    let frames = classification.get_sample(x.view()).unwrap();
    assert_eq!(frames.len(), NUM_FRAMES);

    let tracking = VideoTrackingExporter::new(dir.path(), 10);
    let boxes = tracking_boxes();
    let cases = [
        (None, None, false),
        (Some(&boxes), Some(&boxes), true),
        (None, Some(&boxes), true),
        (Some(&boxes), None, true),
    ];
    for (y_i, y_i_pred, with_boxes) in cases {
        let frames = tracking.get_sample(x.view(), y_i, y_i_pred, with_boxes).unwrap();
        assert_eq!(frames.len(), NUM_FRAMES);
        assert!(frames.iter().all(|f| f.width() == 32 && f.height() == 32));
    }
}

#[test]
fn so2sat_modalities() {
    let dir = tempfile::tempdir().unwrap();
    let exporter = So2SatExporter::new(dir.path());
    let x = pseudo_random(&[32, 32, 14]);

    assert!(exporter.get_sample(x.view(), Modality::Vh).unwrap().is_image());
    assert!(exporter.get_sample(x.view(), Modality::Vv).unwrap().is_image());
    let eo = exporter.get_sample(x.view(), Modality::Eo).unwrap();
    assert!(eo.is_frames());
    assert_eq!(eo.len(), 10);
}

#[test]
fn unknown_modality_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let exporter = Exporter::from(So2SatExporter::new(dir.path()));
    let x = pseudo_random(&[32, 32, 14]);

    let err = exporter
        .get_sample(x.view(), None, None, &SampleOptions::new().modality("rgb"))
        .unwrap_err();
    assert!(err.is_validation());

    let err = exporter
        .get_sample(x.view(), None, None, &SampleOptions::new())
        .unwrap_err();
    assert!(err.is_validation());
}

#[test]
fn generic_exporter_dispatches_per_variant() {
    let dir = tempfile::tempdir().unwrap();
    let image = pseudo_random(&[32, 32, 3]);
    let video = pseudo_random(&[NUM_FRAMES, 32, 32, 3]);
    let opts = SampleOptions::new();

    let img = Exporter::from(ImageClassificationExporter::new(dir.path()))
        .get_sample(image.view(), None, None, &opts)
        .unwrap();
    assert!(matches!(img, Sample::Image(_)));

    let clip = Exporter::from(VideoClassificationExporter::new(dir.path(), 10))
        .get_sample(video.view(), None, None, &opts)
        .unwrap();
    assert_eq!(clip.len(), NUM_FRAMES);
}

#[test]
fn get_sample_is_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    let exporter = ObjectDetectionExporter::new(dir.path());
    let x = pseudo_random(&[32, 32, 3]);
    let y = obj_det_y();
    let a = exporter.get_sample(x.view(), Some(&y), None, true).unwrap();
    let b = exporter.get_sample(x.view(), Some(&y), None, true).unwrap();
    assert_eq!(a, b);
}

#[test]
fn export_writes_expected_files() {
    let dir = tempfile::tempdir().unwrap();

    let mut image = ImageClassificationExporter::new(dir.path());
    let files = image.export(pseudo_random(&[32, 32, 3]).view(), "img").unwrap();
    assert_eq!(files.len(), 1);
    assert!(files[0].ends_with("img.png"));

    let mut video = VideoClassificationExporter::new(dir.path(), 10);
    let files = video
        .export(pseudo_random(&[NUM_FRAMES, 32, 32, 3]).view(), "clip")
        .unwrap();
    assert!(files[0].ends_with("clip.gif"));
    assert_eq!(files.len(), 1 + NUM_FRAMES);
    for t in 0..NUM_FRAMES {
        assert!(video.output_dir().join(format!("clip_frame_{t}.png")).exists());
    }

    let mut so2sat = So2SatExporter::new(dir.path());
    let files = so2sat.export(pseudo_random(&[32, 32, 14]).view(), "tile").unwrap();
    assert_eq!(files.len(), 12);
    assert!(files.iter().all(|p| p.exists()));

    let count = std::fs::read_dir(image.output_dir()).unwrap().count();
    assert_eq!(count, 1 + (1 + NUM_FRAMES) + 12);
}

#[test]
fn wrong_shape_is_a_validation_error() {
    let dir = tempfile::tempdir().unwrap();
    let exporter = ImageClassificationExporter::new(dir.path());
    let err = exporter.get_sample(pseudo_random(&[32, 32, 5]).view()).unwrap_err();
    assert!(err.is_validation());

    let so2sat = So2SatExporter::new(dir.path());
    let err = so2sat
        .get_sample(pseudo_random(&[32, 32, 3]).view(), Modality::Vh)
        .unwrap_err();
    assert!(err.is_validation());
}
