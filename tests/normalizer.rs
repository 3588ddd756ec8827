use imgsqueeze::request::{get_extension, parse_number, resolve_format, to_boolean};
use imgsqueeze::{
    EncodeRequest, FieldValue, OutputFormat, RawOptions, RequestedFormat, ResizeFit,
};
use proptest::prelude::*;

fn text(s: &str) -> Option<FieldValue> {
    Some(FieldValue::from(s))
}

fn request(file_name: &str, raw: RawOptions) -> EncodeRequest {
    EncodeRequest::from_raw(vec![0u8], file_name, &raw)
}

#[test]
fn test_auto_format_follows_extension() {
    assert_eq!(resolve_format(RequestedFormat::Auto, "jpg"), OutputFormat::Jpeg);
    assert_eq!(resolve_format(RequestedFormat::Auto, "png"), OutputFormat::Png);
    assert_eq!(resolve_format(RequestedFormat::Auto, "gif"), OutputFormat::Gif);
    assert_eq!(resolve_format(RequestedFormat::Auto, ""), OutputFormat::Jpeg);
    assert_eq!(resolve_format(RequestedFormat::Auto, "bmp"), OutputFormat::Jpeg);
}

#[test]
fn test_explicit_jpg_is_jpeg_for_every_extension() {
    let requested = RequestedFormat::parse(Some("jpg"));
    for ext in ["", "png", "webp", "avif", "tiff", "gif", "heic"] {
        assert_eq!(resolve_format(requested, ext), OutputFormat::Jpeg);
    }
}

#[test]
fn test_unknown_format_name_falls_back_to_jpeg() {
    let req = request(
        "photo.png",
        RawOptions {
            format: text("bmp"),
            ..Default::default()
        },
    );
    assert_eq!(req.resolved_format(), OutputFormat::Jpeg);
}

#[test]
fn test_to_boolean_truth_table() {
    for truthy in [text("true"), text("1"), Some(1.0.into()), Some(true.into())] {
        assert!(to_boolean(truthy.as_ref()), "{truthy:?}");
    }
    for falsy in [
        None,
        Some(FieldValue::Null),
        text("false"),
        text("0"),
        text("TRUE"),
        text("yes"),
        text(""),
        Some(0.0.into()),
        Some(2.0.into()),
        Some(false.into()),
    ] {
        assert!(!to_boolean(falsy.as_ref()), "{falsy:?}");
    }
}

#[test]
fn test_get_extension_cases() {
    assert_eq!(get_extension("file.txt"), "txt");
    assert_eq!(get_extension("file"), "");
    assert_eq!(get_extension("file."), "");
    assert_eq!(get_extension(".config"), "config");
    assert_eq!(get_extension("archive.tar.GZ"), "gz");
}

#[test]
fn test_quality_presets_and_explicit_override() {
    let preset = |name: &str| {
        request(
            "a.jpg",
            RawOptions {
                preset: text(name),
                ..Default::default()
            },
        )
        .quality()
    };
    assert_eq!(preset("tiny"), 45);
    assert_eq!(preset("small"), 60);
    assert_eq!(preset("balanced"), 75);
    assert_eq!(preset("crisp"), 88);
    assert_eq!(preset("ultra"), 75);

    let explicit = request(
        "a.jpg",
        RawOptions {
            preset: text("tiny"),
            quality: text("92"),
            ..Default::default()
        },
    );
    assert_eq!(explicit.quality(), 92);

    let blank = request(
        "a.jpg",
        RawOptions {
            preset: text("crisp"),
            quality: text("  "),
            ..Default::default()
        },
    );
    assert_eq!(blank.quality(), 88);
}

#[test]
fn test_flatten_only_effective_without_alpha() {
    let flatten_to = |format: &str| {
        request(
            "a.png",
            RawOptions {
                format: text(format),
                flatten: text("true"),
                ..Default::default()
            },
        )
        .flatten_effective()
    };
    assert!(flatten_to("jpeg"));
    assert!(flatten_to("tiff"));
    assert!(!flatten_to("png"));
    assert!(!flatten_to("webp"));
    assert!(!flatten_to("avif"));
    assert!(!flatten_to("gif"));
}

#[test]
fn test_resize_and_target_fields() {
    let req = request(
        "a.png",
        RawOptions {
            width: text("0"),
            height: text("-5"),
            target_bytes: text("abc"),
            ..Default::default()
        },
    );
    assert_eq!(req.resize(), None);
    assert_eq!(req.target_bytes(), None);

    let req = request(
        "a.png",
        RawOptions {
            width: Some(640.0.into()),
            fit: text("cover"),
            target_bytes: text("50000"),
            background: text("#000"),
            ..Default::default()
        },
    );
    let resize = req.resize().unwrap();
    assert_eq!(resize.width.map(|w| w.get()), Some(640));
    assert_eq!(resize.height, None);
    assert_eq!(resize.fit, ResizeFit::Cover);
    assert_eq!(req.target_bytes().map(|t| t.get()), Some(50_000));
    assert_eq!(req.background().to_rgba(), [0, 0, 0, 255]);
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_parse_number_never_fails(s in ".*", fallback in -1e6f64..1e6) {
        let value = parse_number(Some(&FieldValue::Text(s)), fallback);
        prop_assert!(value.is_finite());
    }

    #[test]
    fn prop_explicit_quality_is_clamped(q in -1e4f64..1e4) {
        let req = request("a.jpg", RawOptions { quality: Some(q.into()), ..Default::default() });
        prop_assert!((1..=100).contains(&req.quality()));
    }

    #[test]
    fn prop_from_raw_never_panics(
        name in ".{0,16}",
        format in ".{0,8}",
        width in ".{0,8}",
        keep in ".{0,6}",
    ) {
        let req = request(&name, RawOptions {
            format: text(&format),
            width: text(&width),
            keep_metadata: text(&keep),
            ..Default::default()
        });
        prop_assert!(OutputFormat::ALL.contains(&req.resolved_format()));
    }

    #[test]
    fn prop_extension_has_no_dot(name in ".{0,24}") {
        prop_assert!(!get_extension(&name).contains('.'));
    }
}
