// Unit tests for types module

use super::*;

#[test]
fn test_viewport_size_parse() {
    // Valid formats
    let size = ViewportSize::parse("1920x1080").unwrap();
    assert_eq!(size.width, 1920);
    assert_eq!(size.height, 1080);

    let size = ViewportSize::parse("800x600").unwrap();
    assert_eq!(size, ViewportSize { width: 800, height: 600 });

    // Invalid formats
    assert!(ViewportSize::parse("1920").is_err());
    assert!(ViewportSize::parse("1920x").is_err());
    assert!(ViewportSize::parse("x1080").is_err());
    assert!(ViewportSize::parse("abc x def").is_err());
    assert!(ViewportSize::parse("1920X1080").is_err()); // uppercase X
}

#[test]
fn test_bounding_box_empty() {
    let visible = BoundingBox {
        x: 10.0,
        y: 10.0,
        width: 100.0,
        height: 20.0,
    };
    assert!(!visible.is_empty());

    let collapsed = BoundingBox {
        width: 0.0,
        ..visible
    };
    assert!(collapsed.is_empty());
    assert!(BoundingBox::default().is_empty());
}

#[test]
fn test_scroll_position_serialization() {
    let pos = ScrollPosition::new(0.0, 240.5);
    let json = serde_json::to_value(pos).unwrap();
    assert_eq!(json, serde_json::json!({"x": 0.0, "y": 240.5}));

    let parsed: ScrollPosition = serde_json::from_value(json).unwrap();
    assert_eq!(parsed, pos);
}

#[test]
fn test_now_millis_is_monotonic_enough() {
    let a = now_millis();
    let b = now_millis();
    assert!(b >= a);
    assert!(a > 1_600_000_000_000);
}
