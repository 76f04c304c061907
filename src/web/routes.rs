use actix_files as fs;
use actix_web::{error, web, HttpResponse};
use serde_json::json;

use crate::web::handlers;

/// Chat requests carry the whole visible history, so allow more than the 32 KiB default.
const MAX_CHAT_BODY: usize = 1024 * 1024;

pub fn configure(cfg: &mut web::ServiceConfig) {
    let json_config = web::JsonConfig::default()
        .limit(MAX_CHAT_BODY)
        .error_handler(|err, _req| {
            let body = json!({ "error": err.to_string() });
            error::InternalError::from_response(err, HttpResponse::BadRequest().json(body)).into()
        });

    cfg.service(
        web::scope("/api")
            .app_data(json_config)
            .route("/chat", web::post().to(handlers::chat)),
    )
    .route("/", web::get().to(handlers::index))
    .route("/health", web::get().to(handlers::health_check))
    .service(fs::Files::new("/static", "./static"));
}
