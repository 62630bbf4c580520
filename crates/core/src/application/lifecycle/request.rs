// Dispatch request materialization

use crate::domain::{Gear, Job, JobRequest, RequestEndpoint, RequestTarget};
use crate::error::{AppError, Result};
use serde_json::Value;
use std::collections::BTreeMap;

pub const GEAR_BASE_DIR: &str = "/flywheel/v0";
pub const GEAR_INPUT_DIR: &str = "/flywheel/v0/input";
pub const GEAR_OUTPUT_DIR: &str = "/flywheel/v0/output";
const DEFAULT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Split a rootfs url into (transfer scheme, uri).
///
/// https and scheme-less urls both travel over plain `http`; any other scheme
/// keeps its name and drops it from the uri.
fn rootfs_endpoint(url: &str) -> (String, String) {
    match url.split_once("://") {
        None => ("http".to_string(), url.to_string()),
        Some(("https", _)) | Some(("", _)) => ("http".to_string(), url.to_string()),
        Some((scheme, rest)) => {
            // netloc + path; query and fragment are dropped
            let end = rest.find(['?', '#']).unwrap_or(rest.len());
            (scheme.to_string(), rest[..end].to_string())
        }
    }
}

/// `FW_CONFIG_` suffix for a config key, or `None` if nothing usable is left
pub fn config_env_name(key: &str) -> Option<String> {
    let cleaned: String = key
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == ' ' || *c == '_')
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    Some(cleaned.replace(' ', "_").to_uppercase())
}

fn config_env_value(key: &str, value: &Value) -> Result<String> {
    match value {
        Value::Object(_) => Err(AppError::Validation(format!(
            "Disallowed object-type config value {}",
            key
        ))),
        Value::String(s) => Ok(s.clone()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Ok(other.to_string()),
    }
}

/// Build the request a compute agent needs to run `job`
pub fn generate_request(job: &Job, gear: &Gear) -> Result<JobRequest> {
    if gear.invalid {
        return Err(AppError::Validation(
            "Gear marked as invalid, will not run!".to_string(),
        ));
    }

    let (scheme, uri) = rootfs_endpoint(&gear.rootfs_url);
    let mut inputs = vec![RequestEndpoint {
        scheme,
        uri,
        location: "/".to_string(),
    }];

    let mut env = BTreeMap::new();
    env.insert("PATH".to_string(), DEFAULT_PATH.to_string());
    for (key, value) in &gear.environment {
        env.insert(key.clone(), value.clone());
    }

    for (key, value) in &job.config.config {
        let Some(name) = config_env_name(key) else {
            tracing::warn!(job_id = %job.id, key = %key, "Config key has no usable characters");
            continue;
        };
        env.insert(format!("FW_CONFIG_{}", name), config_env_value(key, value)?);
    }

    inputs.push(RequestEndpoint {
        scheme: "scitran".to_string(),
        uri: format!("/jobs/{}/config.json", job.id),
        location: GEAR_BASE_DIR.to_string(),
    });

    for (name, file) in job.file_inputs() {
        inputs.push(RequestEndpoint {
            scheme: "scitran".to_string(),
            uri: file.file_uri(),
            location: format!("{}/{}", GEAR_INPUT_DIR, name),
        });
    }

    let command = gear.command.clone().unwrap_or_else(|| "./run".to_string());

    // Custom ids only apply when at least one of them is non-root
    let custom_ids = gear.uid.unwrap_or(0) > 0 || gear.gid.unwrap_or(0) > 0;
    let (uid, gid) = if custom_ids {
        (Some(gear.uid.unwrap_or(0)), Some(gear.gid.unwrap_or(0)))
    } else {
        (None, None)
    };

    Ok(JobRequest {
        inputs,
        target: RequestTarget {
            command: vec!["bash".to_string(), "-c".to_string(), command],
            env,
            dir: GEAR_BASE_DIR.to_string(),
            uid,
            gid,
        },
        outputs: vec![RequestEndpoint {
            scheme: "scitran".to_string(),
            uri: format!(
                "/engine?level={}&id={}&job={}",
                job.destination.kind, job.destination.id, job.id
            ),
            location: GEAR_OUTPUT_DIR.to_string(),
        }],
    })
}
