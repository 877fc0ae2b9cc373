use rand::seq::SliceRandom;
use serde::de::DeserializeOwned;
use skiff_protocol::{AllocStub, Allocation, Request, Response};

use crate::client::AgentClient;
use crate::error::ExecError;

/// Resolve an allocation ID or prefix to exactly one allocation. Zero
/// matches is not-found; more than one is an ambiguous-prefix error that
/// lists the candidates.
pub async fn resolve_alloc(
    client: &mut AgentClient,
    prefix: &str,
) -> Result<Allocation, ExecError> {
    let resp = client
        .request(&Request::AllocList {
            prefix: Some(prefix.to_string()),
        })
        .await?;
    let mut stubs: Vec<AllocStub> = expect_data(resp)?;

    match stubs.len() {
        0 => Err(ExecError::AllocNotFound(prefix.to_string())),
        1 => alloc_info(client, &stubs.remove(0).id).await,
        _ => Err(ExecError::AmbiguousPrefix {
            prefix: prefix.to_string(),
            candidates: stubs.into_iter().map(|s| s.id).collect(),
        }),
    }
}

/// Pick a random running allocation from a job's task group.
pub async fn random_job_alloc(
    client: &mut AgentClient,
    job_id: &str,
    group: &str,
) -> Result<Allocation, ExecError> {
    let resp = client
        .request(&Request::JobAllocs {
            job_id: job_id.to_string(),
            group: group.to_string(),
        })
        .await?;
    let stubs: Vec<AllocStub> = expect_data(resp)?;

    let stub = stubs
        .choose(&mut rand::thread_rng())
        .ok_or_else(|| {
            ExecError::AllocNotFound(format!("job {job_id:?} group {group:?}"))
        })?;
    alloc_info(client, &stub.id).await
}

async fn alloc_info(client: &mut AgentClient, alloc_id: &str) -> Result<Allocation, ExecError> {
    let resp = client
        .request(&Request::AllocInfo {
            alloc_id: alloc_id.to_string(),
        })
        .await?;
    expect_data(resp)
}

/// Resolve the task to exec into: an explicit name must exist in the
/// allocation; with no name given the allocation must have exactly one
/// task.
pub fn resolve_task(alloc: &Allocation, explicit: Option<&str>) -> Result<String, ExecError> {
    let names = || {
        alloc
            .tasks
            .iter()
            .map(|t| t.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    };

    match explicit {
        Some(name) => {
            if alloc.tasks.iter().any(|t| t.name == name) {
                Ok(name.to_string())
            } else {
                Err(ExecError::TaskResolution(format!(
                    "task {name:?} not found in allocation {} (tasks: {})",
                    alloc.id,
                    names()
                )))
            }
        }
        None => match alloc.tasks.len() {
            1 => Ok(alloc.tasks[0].name.clone()),
            0 => Err(ExecError::TaskResolution(format!(
                "allocation {} has no tasks",
                alloc.id
            ))),
            _ => Err(ExecError::TaskResolution(format!(
                "allocation {} has multiple tasks, specify one with --task (tasks: {})",
                alloc.id,
                names()
            ))),
        },
    }
}

fn expect_data<T: DeserializeOwned>(resp: Response) -> Result<T, ExecError> {
    match resp {
        Response::Ok { data: Some(data) } => serde_json::from_value(data)
            .map_err(|e| ExecError::Protocol(format!("malformed agent response: {e}"))),
        Response::Ok { data: None } => Err(ExecError::Protocol(
            "agent response missing data".to_string(),
        )),
        Response::Error { message, .. } => Err(ExecError::Agent(message)),
    }
}
