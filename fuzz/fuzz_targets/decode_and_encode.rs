#![no_main]

//! Untrusted source bytes through the whole job: decode, pipeline, encode.

use imgsqueeze::{EncodeRequest, Engine, EngineConfig, JobLimits, OutputFormat, ResizeFit};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() < 2 {
        return;
    }
    let (selector, source) = data.split_at(1);
    let format = OutputFormat::ALL[selector[0] as usize % OutputFormat::ALL.len()];

    let config = EngineConfig::with_limits(JobLimits::strict().with_max_pixels(1 << 20));
    let request = EncodeRequest::builder(source.to_vec())
        .format(format)
        .resize(Some(64), Some(64), ResizeFit::Contain)
        .flatten(true)
        .build();
    let _ = Engine::new(config).encode(&request);
});
