// Properties of the pixel diff used by visual checkpoints and `retrace diff`

use image::{ImageBuffer, Rgba, RgbaImage};
use pretty_assertions::assert_eq;
use retrace::config::VisualConfig;
use retrace::visual;

fn png(img: &RgbaImage) -> Vec<u8> {
    visual::encode_png(img).unwrap()
}

fn checkerboard(width: u32, height: u32) -> RgbaImage {
    ImageBuffer::from_fn(width, height, |x, y| {
        if (x + y) % 2 == 0 {
            Rgba([0, 0, 0, 255])
        } else {
            Rgba([255, 255, 255, 255])
        }
    })
}

fn solid(width: u32, height: u32, shade: u8) -> RgbaImage {
    ImageBuffer::from_pixel(width, height, Rgba([shade, shade, shade, 255]))
}

#[tokio::test]
async fn test_identical_images_do_not_differ() {
    let image = png(&checkerboard(16, 9));
    let diff = visual::compare(&image, &image, &VisualConfig::default())
        .await
        .unwrap();

    assert_eq!(diff.difference_percentage, 0.0);
    assert_eq!(diff.diff_pixels, 0);
    assert_eq!(diff.total_pixels, 16 * 9);
    assert!(!diff.exceeds(0.0));
}

#[tokio::test]
async fn test_difference_is_symmetric_and_bounded() {
    let config = VisualConfig::default();
    let pairs = [
        (solid(10, 10, 0), solid(10, 10, 255)),
        (checkerboard(8, 8), solid(8, 8, 0)),
        (solid(4, 4, 100), solid(6, 3, 100)),
    ];

    for (a, b) in pairs {
        let (a, b) = (png(&a), png(&b));
        let forward = visual::compare(&a, &b, &config).await.unwrap();
        let backward = visual::compare(&b, &a, &config).await.unwrap();

        assert_eq!(forward.difference_percentage, backward.difference_percentage);
        assert_eq!(forward.total_pixels, backward.total_pixels);
        assert!((0.0..=100.0).contains(&forward.difference_percentage));
    }
}

#[tokio::test]
async fn test_size_mismatch_counts_uncovered_pixels() {
    let small = png(&solid(2, 2, 50));
    let large = png(&solid(4, 2, 50));

    let diff = visual::compare(&small, &large, &VisualConfig::default())
        .await
        .unwrap();

    assert_eq!(diff.total_pixels, 8);
    assert_eq!(diff.diff_pixels, 4);
    assert_eq!(diff.difference_percentage, 50.0);
    assert!(diff.exceeds(VisualConfig::default().threshold));

    let rendered = image::load_from_memory(&visual::decode_data_url(&diff.diff).unwrap())
        .unwrap()
        .to_rgba8();
    assert_eq!(rendered.dimensions(), (4, 2));
}

#[tokio::test]
async fn test_undecodable_input_is_a_comparison_error() {
    let good = png(&solid(2, 2, 0));
    let err = visual::compare(b"not a png", &good, &VisualConfig::default())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "VisualComparisonError");
    assert_eq!(err.exit_code(), 7);
}
