#![no_main]

//! Arbitrary raw option fields must always resolve to a valid request.

use arbitrary::Arbitrary;
use imgsqueeze::{EncodeRequest, FieldValue, OutputFormat, RawOptions};
use libfuzzer_sys::fuzz_target;

#[derive(Arbitrary, Debug)]
enum Field {
    Text(String),
    Number(f64),
    Bool(bool),
    Null,
}

impl From<Field> for FieldValue {
    fn from(field: Field) -> Self {
        match field {
            Field::Text(s) => FieldValue::Text(s),
            Field::Number(n) => FieldValue::Number(n),
            Field::Bool(b) => FieldValue::Bool(b),
            Field::Null => FieldValue::Null,
        }
    }
}

#[derive(Arbitrary, Debug)]
struct Input {
    file_name: String,
    format: Option<Field>,
    quality: Option<Field>,
    preset: Option<Field>,
    width: Option<Field>,
    height: Option<Field>,
    fit: Option<Field>,
    target_bytes: Option<Field>,
    flatten: Option<Field>,
    background: Option<Field>,
}

fuzz_target!(|input: Input| {
    let raw = RawOptions {
        format: input.format.map(Into::into),
        quality: input.quality.map(Into::into),
        preset: input.preset.map(Into::into),
        width: input.width.map(Into::into),
        height: input.height.map(Into::into),
        fit: input.fit.map(Into::into),
        target_bytes: input.target_bytes.map(Into::into),
        flatten: input.flatten.map(Into::into),
        background: input.background.map(Into::into),
        ..Default::default()
    };
    let request = EncodeRequest::from_raw(vec![0u8], &input.file_name, &raw);
    assert!((1..=100).contains(&request.quality()));
    assert!(OutputFormat::ALL.contains(&request.resolved_format()));
    if request.flatten_effective() {
        assert!(!request.resolved_format().supports_alpha());
    }
});
