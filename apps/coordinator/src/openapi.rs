use utoipa::OpenApi;

use crate::api;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Meshforge Coordinator API",
        description = "Image-to-mesh job queue: submit images, track progress, download results",
        version = env!("CARGO_PKG_VERSION"),
    ),
    paths(
        api::jobs::upload_image,
        api::jobs::get_job,
        api::jobs::download_stl,
        api::jobs::download_glb,
        api::jobs::queue_status,
    ),
    components(schemas(
        domain_jobs::models::AdmissionTicket,
        domain_jobs::models::JobStatus,
        domain_jobs::models::QueueSummary,
        api::jobs::JobResponse,
        api::jobs::QueueStatusResponse,
        axum_helpers::ErrorResponse,
        axum_helpers::errors::ErrorBody,
    )),
    tags(
        (name = "jobs", description = "Job submission and tracking")
    )
)]
pub struct ApiDoc;
