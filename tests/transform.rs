//! Built-in transforms, chains and job files.

use std::io::Write;

use image::{DynamicImage, GrayImage, Luma, Rgb, RgbImage};
use refract::{
    ErrorKind, Frame, FrameTransform, ImageBatch, JobFile, Origin, RefractError, TransformChain,
    TransformConfiguration, TransformKind, TransformOptions,
};

fn gradient(width: u32) -> Frame {
    Frame::new(DynamicImage::ImageLuma8(GrayImage::from_fn(width, 1, |x, _| {
        Luma([(x * 10) as u8])
    })))
}

fn row(frame: &Frame) -> Vec<u8> {
    frame.image().to_luma8().pixels().map(|pixel| pixel.0[0]).collect()
}

// ── Built-in kinds ─────────────────────────────────────────────────

#[test]
fn flips_and_rotation_move_pixels() {
    let frame = gradient(4);
    let flipped = TransformConfiguration::new(TransformKind::FlipHorizontal)
        .apply(&frame)
        .unwrap();
    assert_eq!(row(&flipped), vec![30, 20, 10, 0]);

    let rotated = TransformConfiguration::new(TransformKind::Rotate180)
        .apply(&frame)
        .unwrap();
    assert_eq!(row(&rotated), vec![30, 20, 10, 0]);

    let vertical = TransformConfiguration::new(TransformKind::FlipVertical)
        .apply(&frame)
        .unwrap();
    assert_eq!(row(&vertical), row(&frame));
}

#[test]
fn grayscale_keeps_rgb_layout() {
    let frame = Frame::new(DynamicImage::ImageRgb8(RgbImage::from_pixel(
        3,
        2,
        Rgb([200, 40, 40]),
    )));
    let gray = TransformConfiguration::new(TransformKind::Grayscale)
        .apply(&frame)
        .unwrap();

    assert_eq!(gray.pixel_format(), frame.pixel_format());
    assert_eq!((gray.width(), gray.height()), (3, 2));
    let [r, g, b] = gray.image().to_rgb8().get_pixel(0, 0).0;
    assert!(r == g && g == b);
}

#[test]
fn brighten_saturates() {
    let frame = gradient(3);
    let brighter = TransformConfiguration::new(TransformKind::Brighten { amount: 250 })
        .apply(&frame)
        .unwrap();
    assert_eq!(row(&brighter), vec![250, 255, 255]);

    let darker = TransformConfiguration::new(TransformKind::Brighten { amount: -15 })
        .apply(&frame)
        .unwrap();
    assert_eq!(row(&darker), vec![0, 0, 5]);
}

#[test]
fn mirror_reflects_left_part_around_origin() {
    let frame = gradient(6);
    let centred = TransformConfiguration::new(TransformKind::Mirror)
        .apply(&frame)
        .unwrap();
    assert_eq!(row(&centred), vec![0, 10, 20, 20, 10, 0]);

    let narrow = TransformConfiguration::new(TransformKind::Mirror)
        .with_origin(Origin::new(1.0 / 3.0, 0.5))
        .apply(&frame)
        .unwrap();
    // Columns past the reflected span stay untouched.
    assert_eq!(row(&narrow), vec![0, 10, 10, 0, 40, 50]);
}

#[test]
fn blur_needs_positive_sigma() {
    let frame = gradient(8);
    let blurred = TransformConfiguration::new(TransformKind::Blur { sigma: 1.0 })
        .apply(&frame)
        .unwrap();
    assert_eq!(blurred.width(), 8);

    let broken = TransformConfiguration::new(TransformKind::Blur { sigma: 0.0 });
    assert_eq!(broken.validate().unwrap_err().kind(), ErrorKind::Configuration);
    assert_eq!(
        broken.apply(&frame).unwrap_err().kind(),
        ErrorKind::TransformFailure
    );
}

// ── Chains ─────────────────────────────────────────────────────────

#[test]
fn chain_applies_steps_in_order() {
    let chain = TransformChain::new(vec![
        TransformConfiguration::new(TransformKind::Brighten { amount: 100 }),
        TransformConfiguration::new(TransformKind::Invert),
    ]);
    let output = chain.apply(&gradient(3)).unwrap();
    assert_eq!(row(&output), vec![155, 145, 135]);
    assert_eq!(chain.name(), "brighten-100+invert");
}

#[test]
fn empty_chain_is_identity() {
    let frame = gradient(5);
    let output = TransformChain::default().apply(&frame).unwrap();
    assert_eq!(output, frame);
}

#[test]
fn closures_are_transforms() {
    let threshold = |frame: &Frame| {
        let mut image = frame.image().to_luma8();
        for pixel in image.pixels_mut() {
            pixel.0[0] = if pixel.0[0] >= 20 { 255 } else { 0 };
        }
        Ok::<_, RefractError>(Frame::new(DynamicImage::ImageLuma8(image)))
    };
    assert_eq!(row(&threshold.apply(&gradient(4)).unwrap()), vec![0, 0, 255, 255]);
}

// ── Job files ──────────────────────────────────────────────────────

#[test]
fn job_file_reads_from_disk() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{
            "input": "clips/in.mp4",
            "output": "clips/out.mp4",
            "workers": 6,
            "frame_rate_cap": 24.0,
            "overwrite": true,
            "transforms": [
                {{ "kind": "grayscale" }},
                {{ "kind": "mirror", "origin": {{ "x": 0.25, "y": 0.5 }}, "name": "left-quarter" }},
                {{ "kind": "brighten", "amount": -10 }}
            ]
        }}"#
    )
    .unwrap();

    let job = JobFile::from_path(file.path()).unwrap();
    assert_eq!(job.input.to_str(), Some("clips/in.mp4"));
    assert!(job.overwrite);

    let options = job.apply_to(TransformOptions::new());
    assert_eq!(options.workers(), 6);
    assert_eq!(options.frame_rate_cap(), Some(24.0));

    let chain = job.chain();
    assert_eq!(chain.steps().len(), 3);
    assert_eq!(chain.steps()[1].origin(), Origin::new(0.25, 0.5));
    assert_eq!(chain.name(), "grayscale+left-quarter+brighten--10");
}

#[test]
fn job_file_rejects_bad_values() {
    let cases = [
        r#"{"input":"a","output":"b","workers":0,"transforms":[{"kind":"invert"}]}"#,
        r#"{"input":"a","output":"b","frame_rate_cap":-1,"transforms":[{"kind":"invert"}]}"#,
        r#"{"input":"a","output":"b","transforms":[{"kind":"blur","sigma":-2}]}"#,
        r#"{"input":"a","output":"b","transforms":[{"kind":"invert","origin":{"x":0.1,"y":0.1}}]}"#,
        r#"{"input":"a","output":"b","transforms":[{"kind":"mirror","origin":{"x":2,"y":0}}]}"#,
    ];
    for json in cases {
        let error = JobFile::from_json(json).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Configuration, "{json}");
    }
}

#[test]
fn job_file_rejects_unknown_shapes() {
    for json in [
        r#"{"input":"a","output":"b","transforms":[{"kind":"kaleidoscope"}]}"#,
        r#"{"input":"a","output":"b","threads":2,"transforms":[{"kind":"invert"}]}"#,
        r#"{"input":"a","transforms":[{"kind":"invert"}]}"#,
        "not json",
    ] {
        let error = JobFile::from_json(json).unwrap_err();
        assert!(matches!(error, RefractError::JsonError(_)), "{json}");
    }
}

#[test]
fn missing_job_file_is_an_io_error() {
    let error = JobFile::from_path("does/not/exist.json").unwrap_err();
    assert!(matches!(error, RefractError::IoError(_)));
}

// ── Still images ───────────────────────────────────────────────────

fn write_gray(path: &std::path::Path, values: &[u8]) {
    GrayImage::from_raw(values.len() as u32, 1, values.to_vec())
        .unwrap()
        .save(path)
        .unwrap();
}

fn file_names(paths: &[std::path::PathBuf]) -> Vec<String> {
    paths
        .iter()
        .map(|path| path.file_name().unwrap().to_string_lossy().into_owned())
        .collect()
}

#[test]
fn image_batch_writes_one_file_per_image_and_transform() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    write_gray(&input.path().join("a.png"), &[0, 10, 20]);
    write_gray(&input.path().join("b.scan.png"), &[100, 100, 100]);
    write_gray(&input.path().join(".hidden.png"), &[1, 1, 1]);
    std::fs::write(input.path().join("notes.txt"), "not an image").unwrap();
    std::fs::create_dir(input.path().join("nested")).unwrap();

    let batch = ImageBatch::new(vec![
        TransformConfiguration::new(TransformKind::Invert),
        TransformConfiguration::new(TransformKind::Brighten { amount: 5 }).with_name("lift"),
    ]);
    let report = batch.run(input.path(), output.path()).unwrap();

    assert_eq!(
        file_names(&report.written),
        ["a-invert.png", "a-lift.png", "b-invert.png", "b-lift.png"]
    );
    let failed: Vec<_> = report.failed.iter().map(|(path, _)| path.clone()).collect();
    assert_eq!(file_names(&failed), ["notes.txt"]);

    let inverted = image::open(output.path().join("a-invert.png")).unwrap();
    assert_eq!(inverted.to_luma8().into_raw(), vec![255, 245, 235]);
    let lifted = image::open(output.path().join("b-lift.png")).unwrap();
    assert_eq!(lifted.to_luma8().into_raw(), vec![105, 105, 105]);
}

#[test]
fn image_batch_accepts_a_single_file_and_clears_output() {
    let input = tempfile::tempdir().unwrap();
    let image = input.path().join("frame.png");
    write_gray(&image, &[7, 8]);

    let output = tempfile::tempdir().unwrap();
    let stale = output.path().join("stale.png");
    std::fs::write(&stale, "old").unwrap();

    let job = JobFile::from_json(
        r#"{"input":"frame.png","output":"out","clear_output_directory":true,
            "transforms":[{"kind":"flip_horizontal"}]}"#,
    )
    .unwrap();
    let report = ImageBatch::from_job(&job).run(&image, output.path()).unwrap();

    assert_eq!(file_names(&report.written), ["frame-flip-horizontal.png"]);
    assert!(report.failed.is_empty());
    assert!(!stale.exists());
    let flipped = image::open(&report.written[0]).unwrap();
    assert_eq!(flipped.to_luma8().into_raw(), vec![8, 7]);
}

#[test]
fn image_batch_rejects_bad_setup() {
    let output = tempfile::tempdir().unwrap();
    let missing = ImageBatch::new(vec![TransformConfiguration::new(TransformKind::Invert)])
        .run("does/not/exist", output.path())
        .unwrap_err();
    assert!(matches!(missing, RefractError::FileOpen { .. }));

    let empty = ImageBatch::new(Vec::new())
        .run(output.path(), output.path())
        .unwrap_err();
    assert_eq!(empty.kind(), ErrorKind::Configuration);
}
