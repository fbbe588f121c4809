use crate::{error::ApiError, job, job::JobManager, models::*};
use axum::http::StatusCode;
use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    job_manager: Arc<JobManager>,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            job_manager: Arc::new(JobManager::new()),
        }
    }
}

/// POST /run
pub async fn run_handler(
    State(st): State<Arc<AppState>>,
    Json(req): Json<RunRequest>,
) -> Result<(StatusCode, Json<Accepted>), ApiError> {
    log::debug!("/run {}", req.script_path.display());
    // reject bad scripts here instead of queueing a job that cannot start
    let check = req.clone();
    tokio::task::spawn_blocking(move || job::prepare(&check))
        .await?
        .map_err(ApiError::BadRequest)?;
    let job_id = st.job_manager.enqueue(req).await?;
    Ok((StatusCode::ACCEPTED, Json(Accepted { job_id })))
}

/// GET /job/{id}
pub async fn job_status(
    State(st): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JobView>, ApiError> {
    match st.job_manager.get(&id).await {
        Some(v) => Ok(Json(v)),
        None => Err(ApiError::NotFound(anyhow::anyhow!("unknown job id {id}"))),
    }
}

pub fn build_router() -> Router {
    let state = Arc::new(AppState::new());
    Router::new()
        .route("/run", post(run_handler))
        .route("/job/:id", get(job_status))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::tests::dry_run_workspace;
    use std::time::Duration;

    #[tokio::test]
    async fn accepts_then_reports() {
        let dir = tempfile::tempdir().unwrap();
        let req = dry_run_workspace(dir.path());
        let st = Arc::new(AppState::new());

        let (code, Json(accepted)) = match run_handler(State(st.clone()), Json(req)).await {
            Ok(r) => r,
            Err(e) => panic!("rejected: {e}"),
        };
        assert_eq!(code, StatusCode::ACCEPTED);

        let mut last = None;
        for _ in 0..200 {
            let Ok(Json(v)) = job_status(State(st.clone()), Path(accepted.job_id.clone())).await else {
                panic!("job vanished");
            };
            if v.status == JobStatus::Failed {
                last = Some(v);
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let v = last.expect("job did not finish");
        let body = serde_json::to_value(&v).unwrap();
        assert_eq!(body["status"], "failed");
        assert_eq!(body["report"]["status"]["kind"], "failed");
        assert_eq!(body["report"]["status"]["key"], "03_save");
    }

    #[tokio::test]
    async fn bad_script_is_a_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let st = Arc::new(AppState::new());
        let req = RunRequest::new(dir.path().join("absent.yaml"));
        match run_handler(State(st), Json(req)).await {
            Err(ApiError::BadRequest(e)) => assert!(e.to_string().contains("absent.yaml")),
            Err(e) => panic!("wrong error: {e}"),
            Ok(_) => panic!("accepted a missing script"),
        }
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let st = Arc::new(AppState::new());
        assert!(matches!(
            job_status(State(st), Path("missing".into())).await,
            Err(ApiError::NotFound(_))
        ));
    }
}
