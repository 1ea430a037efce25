use axum::body::Bytes;
use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use symserver_service::metric;
use symserver_service::types::SymbolicationJob;

use crate::service::RequestService;

use super::RequestError;

fn decode_payload(body: &Bytes) -> Result<Value, RequestError> {
    serde_json::from_slice(body)
        .map_err(|e| RequestError::bad_request("bad_json", format!("payload is not valid JSON: {e}")))
}

/// The modern symbolication API: many jobs per request, inline expansion.
///
/// Request timing is emitted by the API metrics layer wrapping the router.
pub async fn symbolicate_v5(
    State(service): State<RequestService>,
    body: Bytes,
) -> Result<Json<Value>, RequestError> {
    let mut payload = decode_payload(&body)?;

    // a body without a "jobs" key is a single job
    let job_values: Vec<Value> = match payload.get_mut("jobs").map(Value::take) {
        Some(Value::Array(jobs)) => jobs,
        Some(_) => {
            return Err(RequestError::bad_request("invalid_jobs", "jobs must be a list"));
        }
        None => vec![payload],
    };

    let max_jobs = service.config().max_jobs;
    if job_values.len() > max_jobs {
        return Err(RequestError::bad_request(
            "too_many_jobs",
            format!("please limit number of jobs in a single request to <= {max_jobs}"),
        ));
    }

    metric!(
        histogram("symbolicate.jobs_count") = job_values.len() as u64,
        "version" => "v5",
    );

    let jobs = job_values
        .iter()
        .enumerate()
        .map(|(index, value)| SymbolicationJob::from_value(index, value))
        .collect::<Result<Vec<_>, _>>()?;

    let results = service.symbolication().symbolicate(&jobs, "v5").await;

    Ok(Json(json!({ "results": results })))
}

/// The legacy symbolication API: one job, flattened response strings.
pub async fn symbolicate_v4(
    State(service): State<RequestService>,
    body: Bytes,
) -> Result<Json<Value>, RequestError> {
    let payload = decode_payload(&body)?;

    let job = SymbolicationJob::from_value(0, &payload)?;
    let memory_map = job.memory_map.clone();

    let results = service.symbolication().symbolicate(&[job], "v4").await;
    let symdata = &results[0];

    // one rendered string per input frame, without inline expansion
    let symbolicated_stacks: Vec<Vec<String>> = symdata
        .stacks
        .iter()
        .map(|stack| {
            stack
                .iter()
                .map(|frame| {
                    let function = frame.function.as_ref().unwrap_or(&frame.module_offset);
                    format!("{} (in {})", function, frame.module)
                })
                .collect()
        })
        .collect();

    let known_modules: Vec<Option<bool>> = memory_map
        .iter()
        .map(|(debug_file, debug_id)| {
            symdata
                .found_modules
                .get(&format!("{debug_file}/{debug_id}"))
                .copied()
                .flatten()
        })
        .collect();

    Ok(Json(json!({
        "symbolicatedStacks": symbolicated_stacks,
        "knownModules": known_modules,
    })))
}
