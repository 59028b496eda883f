use std::path::PathBuf;
use std::time::Instant;

use voxcpm_kk::{
    engines::voxcpm::{VoxCpmEngine, VoxCpmInferenceParams, VoxCpmModelParams},
    SynthesisEngine,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut engine = VoxCpmEngine::new();
    let model_path = PathBuf::from("openbmb/VoxCPM1.5");

    let load_start = Instant::now();
    engine.load_model_with_params(
        &model_path,
        VoxCpmModelParams {
            lora_weights_path: Some(PathBuf::from("lora")),
            ..Default::default()
        },
    )?;
    println!("Model loaded in {:.2?}", load_start.elapsed());

    let text = "Сәлем! Бұл қазақ тіліндегі сөйлеу синтезі. \
                Әр сөйлем жеке өңделеді.";

    let params = VoxCpmInferenceParams {
        prompt_wav_path: Some(PathBuf::from("voices/kazakh_man_1/ref.wav")),
        prompt_text: Some("Сәлеметсіз бе".to_string()),
        ..Default::default()
    };

    let mut chunks = 0;
    let stream_start = Instant::now();
    engine.generate_streaming(text, &params, |samples| {
        chunks += 1;
        println!(
            "chunk {chunks}: {} samples after {:.2?}",
            samples.len(),
            stream_start.elapsed()
        );
        Ok(())
    })?;

    let synth_start = Instant::now();
    let result = engine.synthesize(text, Some(params))?;
    let synth_dur = synth_start.elapsed();

    let audio_duration = result.duration_secs();
    let speedup = audio_duration / synth_dur.as_secs_f64();
    println!(
        "Synthesized {:.2}s audio in {:.2?} ({:.1}x real-time)",
        audio_duration, synth_dur, speedup
    );

    result.write_wav(&PathBuf::from("output.wav"))?;
    println!("Saved to output.wav");

    engine.unload_model();
    Ok(())
}
