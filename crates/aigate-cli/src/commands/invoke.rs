use std::time::Duration;

use aigate_core::{Capability, Gateway, InvokeOptions, Payload};
use serde_json::{json, Value};
use tokio::time::Instant;

use crate::cli::InvokeArgs;
use crate::error::CliError;

pub async fn run(args: &InvokeArgs, gateway: &Gateway) -> Result<Value, CliError> {
    let capability = args.capability.parse::<Capability>()?;
    let options = parse_options(&args.options)?;
    let payload = read_payload(args, capability)?;
    let deadline = args
        .deadline_ms
        .map(|millis| Instant::now() + Duration::from_millis(millis));

    let (result, trace) = gateway
        .invoke_detailed(capability, payload, options, deadline)
        .await;

    if args.trace {
        Ok(json!({ "result": result, "trace": trace }))
    } else {
        Ok(serde_json::to_value(result)?)
    }
}

fn parse_options(raw: &[String]) -> Result<InvokeOptions, CliError> {
    raw.iter().try_fold(InvokeOptions::new(), |options, pair| {
        let (key, value) = InvokeOptions::parse_pair(pair)?;
        Ok(options.with(key, value))
    })
}

fn read_payload(args: &InvokeArgs, capability: Capability) -> Result<Payload, CliError> {
    if let Some(path) = &args.audio_file {
        if !capability.takes_audio() {
            return Err(CliError::Command(format!(
                "capability '{capability}' takes a text payload, not --audio-file"
            )));
        }
        return Ok(Payload::audio(std::fs::read(path)?));
    }

    match &args.text {
        Some(text) if capability.takes_audio() => Err(CliError::Command(format!(
            "capability '{capability}' takes an audio payload; use --audio-file (got {} chars of text)",
            text.chars().count()
        ))),
        Some(text) => Ok(Payload::text(text.clone())),
        None => Err(CliError::Command(String::from(
            "either a text payload or --audio-file is required",
        ))),
    }
}
