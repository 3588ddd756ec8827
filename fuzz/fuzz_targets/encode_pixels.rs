#![no_main]

//! Arbitrary pixels and quality through every encoder.

use arbitrary::{Arbitrary, Unstructured};
use image::{DynamicImage, RgbaImage};
use imgsqueeze::engine::{encode_with_options, EncodeFlags, FormatOptions, ImageMetadata};
use imgsqueeze::OutputFormat;
use libfuzzer_sys::fuzz_target;

#[derive(Arbitrary, Debug)]
struct EncodeSeed {
    format: u8,
    quality: u8,
    width: u8,
    height: u8,
    lossless: bool,
    progressive: bool,
}

fn build_image(data: &[u8], width: u8, height: u8) -> DynamicImage {
    // Max 128x128 keeps each run small
    let w = (width as u32 % 128).max(1);
    let h = (height as u32 % 128).max(1);
    let len = (w * h * 4) as usize;
    let buffer: Vec<u8> = (0..len)
        .map(|i| data.get(i % data.len().max(1)).copied().unwrap_or(128))
        .collect();
    match RgbaImage::from_raw(w, h, buffer) {
        Some(rgba) => DynamicImage::ImageRgba8(rgba),
        None => DynamicImage::new_rgba8(1, 1),
    }
}

fuzz_target!(|data: &[u8]| {
    let mut unstructured = Unstructured::new(data);
    let Ok(seed) = EncodeSeed::arbitrary(&mut unstructured) else {
        return;
    };

    let img = build_image(data, seed.width, seed.height);
    let format = OutputFormat::ALL[seed.format as usize % OutputFormat::ALL.len()];
    let flags = EncodeFlags {
        lossless: seed.lossless,
        progressive: seed.progressive,
    };
    let options = FormatOptions::new(format, seed.quality, flags);
    let _ = encode_with_options(&img, &options, &ImageMetadata::default());
});
