use actix_cors::Cors;
use actix_web::{get, post, web, App, HttpResponse, HttpServer, Responder};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use novel_scraper_lib::{
    logger, ControlAction, JobError, JobManager, ProviderRegistry, RetryError, SearchAggregator, Settings,
};

struct AppState {
    jobs: Arc<JobManager>,
    search: Arc<SearchAggregator>,
}

#[derive(Deserialize)]
struct StartRequest {
    #[serde(default)]
    url: String,
}

#[derive(Deserialize)]
struct ControlRequest {
    #[serde(default)]
    task_id: String,
}

#[derive(Deserialize)]
struct SearchRequest {
    #[serde(default)]
    keyword: String,
}

const STATIC_DIR: &str = "./static";

/// The browser frontend: `index.html` at `/`, its script next to it.
fn static_files(dir: &str) -> actix_files::Files {
    actix_files::Files::new("/", dir).index_file("index.html")
}

fn not_found() -> HttpResponse {
    HttpResponse::NotFound().json(json!({ "error": "Task not found" }))
}

#[get("/api/health")]
async fn health_check() -> impl Responder {
    HttpResponse::Ok().json("Server is running")
}

#[post("/api/start")]
async fn start_download(body: web::Json<StartRequest>, data: web::Data<AppState>) -> impl Responder {
    match data.jobs.start_job(&body.url) {
        Ok(task_id) => HttpResponse::Ok().json(json!({ "task_id": task_id })),
        Err(JobError::MissingSource) => HttpResponse::BadRequest().json(json!({ "error": "URL is required" })),
        Err(e) => HttpResponse::BadRequest().json(json!({ "error": e.to_string() })),
    }
}

#[get("/api/progress/{task_id}")]
async fn get_progress(path: web::Path<String>, data: web::Data<AppState>) -> impl Responder {
    match data.jobs.progress(&path.into_inner()) {
        Some(job) => HttpResponse::Ok().json(job),
        None => not_found(),
    }
}

#[post("/api/control/{action}")]
async fn control_task(
    path: web::Path<String>,
    body: web::Json<ControlRequest>,
    data: web::Data<AppState>,
) -> impl Responder {
    let action: ControlAction = match path.into_inner().parse() {
        Ok(a) => a,
        Err(_) => return HttpResponse::BadRequest().json(json!({ "error": "Invalid action" })),
    };
    match data.jobs.control(&body.task_id, action) {
        Ok(()) => {
            let status = match action {
                ControlAction::Pause => "paused",
                ControlAction::Resume => "resumed",
            };
            HttpResponse::Ok().json(json!({ "status": status }))
        }
        Err(JobError::NotFound(_)) => not_found(),
        Err(e) => HttpResponse::BadRequest().json(json!({ "error": e.to_string() })),
    }
}

#[post("/api/retry_failed/{task_id}")]
async fn retry_failed(path: web::Path<String>, data: web::Data<AppState>) -> impl Responder {
    match data.jobs.retry_failed(&path.into_inner()) {
        Ok(count) => HttpResponse::Ok().json(json!({ "status": "ok", "count": count })),
        Err(RetryError::NotFound(_)) => not_found(),
        Err(e) => HttpResponse::BadRequest().json(json!({ "error": e.to_string() })),
    }
}

#[get("/api/download/{filename}")]
async fn download_file(path: web::Path<String>, data: web::Data<AppState>) -> impl Responder {
    let filename = path.into_inner();
    let Some(file) = data.jobs.artifact_path(&filename) else {
        return HttpResponse::NotFound().body("File not found");
    };

    match web::block(move || std::fs::read(file)).await {
        Ok(Ok(content)) => HttpResponse::Ok()
            .content_type("application/octet-stream")
            .append_header((
                "Content-Disposition",
                format!("attachment; filename*=UTF-8''{}", urlencoding::encode(&filename)),
            ))
            .body(content),
        Ok(Err(e)) => {
            log::error!("Cannot read {}: {}", filename, e);
            HttpResponse::InternalServerError().body("Cannot read file")
        }
        Err(e) => {
            log::error!("Download task for {} failed: {}", filename, e);
            HttpResponse::InternalServerError().body("Cannot read file")
        }
    }
}

#[post("/api/search/start")]
async fn start_search(body: web::Json<SearchRequest>, data: web::Data<AppState>) -> impl Responder {
    match data.search.start_search(&body.keyword) {
        Ok(task_id) => HttpResponse::Ok().json(json!({ "task_id": task_id })),
        Err(_) => HttpResponse::BadRequest().json(json!({ "error": "No keyword" })),
    }
}

#[get("/api/search/progress/{task_id}")]
async fn search_progress(path: web::Path<String>, data: web::Data<AppState>) -> impl Responder {
    match data.search.search_progress(&path.into_inner()) {
        Some(job) => HttpResponse::Ok().json(job),
        None => not_found(),
    }
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();
    logger::init();

    let settings = Settings::from_env();
    let bind_addr = settings.bind_addr.clone();
    std::fs::create_dir_all(&settings.download_dir)?;

    let state = web::Data::new(AppState {
        jobs: Arc::new(JobManager::new(settings.clone(), ProviderRegistry::with_defaults())),
        search: Arc::new(SearchAggregator::with_defaults(settings)),
    });

    log::info!("Starting Web Server at http://{}", bind_addr);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header();

        App::new()
            .wrap(cors)
            .app_data(state.clone())
            .service(health_check)
            .service(start_download)
            .service(get_progress)
            .service(control_task)
            .service(retry_failed)
            .service(download_file)
            .service(start_search)
            .service(search_progress)
            .service(static_files(STATIC_DIR))
    })
    .bind(bind_addr.as_str())?
    .run()
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, App};

    const SHIPPED: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/static");

    #[actix_web::test]
    async fn test_frontend_is_served_at_root() {
        let app = test::init_service(App::new().service(health_check).service(static_files(SHIPPED))).await;

        let resp = test::call_service(&app, test::TestRequest::get().uri("/").to_request()).await;
        assert!(resp.status().is_success());
        let body = test::read_body(resp).await;
        assert!(String::from_utf8_lossy(&body).contains("script.js"));

        let resp = test::call_service(&app, test::TestRequest::get().uri("/script.js").to_request()).await;
        assert!(resp.status().is_success());
        let body = test::read_body(resp).await;
        assert!(String::from_utf8_lossy(&body).contains("/api/start"));

        let resp = test::call_service(&app, test::TestRequest::get().uri("/api/health").to_request()).await;
        assert!(resp.status().is_success());
    }
}
