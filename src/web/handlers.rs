use std::convert::Infallible;

use actix_web::{http::header, web, HttpResponse, Responder};
use futures_util::stream::{self, StreamExt};
use log::{error, info};
use serde_json::json;
use tera::Context;
use uuid::Uuid;

use crate::chat::types::{MAX_TOKENS_RANGE, TEMPERATURE_RANGE, TOP_P_RANGE};
use crate::error::{CompletionError, RequestError};
use crate::web::models::{ChatRequest, ChatResponse};
use crate::AppState;

// Index page handler
pub async fn index(data: web::Data<AppState>) -> impl Responder {
    let defaults = &data.defaults;
    let mut context = Context::new();
    context.insert("system_message", &defaults.system_message);
    context.insert("max_tokens", &defaults.sampling.max_tokens);
    // f32 values go in as text so the page shows 0.7 rather than 0.699999988.
    context.insert("temperature", &defaults.sampling.temperature.to_string());
    context.insert("top_p", &defaults.sampling.top_p.to_string());
    context.insert("max_tokens_range", &MAX_TOKENS_RANGE);
    context.insert("temperature_range", &range_text(TEMPERATURE_RANGE));
    context.insert("top_p_range", &range_text(TOP_P_RANGE));

    match data.tera.render("index.html", &context) {
        Ok(html) => HttpResponse::Ok().content_type("text/html").body(html),
        Err(e) => {
            error!("Template error: {}", e);
            HttpResponse::InternalServerError().body("Template error")
        }
    }
}

fn range_text((min, max): (f32, f32)) -> [String; 2] {
    [min.to_string(), max.to_string()]
}

// Health check endpoint
pub async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(json!({ "status": "ok" }))
}

// Chat API endpoint
pub async fn chat(
    data: web::Data<AppState>,
    req: web::Json<ChatRequest>,
) -> Result<HttpResponse, RequestError> {
    let req = req.into_inner();
    let config = req.generation_config(&data.defaults)?;
    let request_id = Uuid::new_v4();

    info!(
        "Chat request {}: {} history turns, search_kg={}, max_tokens={}, stream={}",
        request_id,
        req.history.len(),
        config.search_kg,
        config.sampling.max_tokens,
        req.stream
    );

    let mut responses = data.chat.respond(&req.message, &req.history, config);

    if req.stream {
        let done = stream::once(async move {
            info!("Chat request {} finished streaming", request_id);
            Ok::<_, Infallible>(web::Bytes::from(format!(
                "event: done\ndata: {}\n\n",
                json!({ "request_id": request_id })
            )))
        });
        let events = responses
            .map(|item| Ok::<_, Infallible>(web::Bytes::from(sse_event(item))))
            .chain(done);

        return Ok(HttpResponse::Ok()
            .content_type("text/event-stream")
            .insert_header((header::CACHE_CONTROL, "no-cache"))
            .streaming(events));
    }

    let mut response = String::new();
    while let Some(item) = responses.next().await {
        match item {
            Ok(partial) => response = partial,
            Err(e) => {
                error!("Chat request {} failed: {}", request_id, e);
                return Ok(HttpResponse::BadGateway().json(json!({
                    "error": e.to_string(),
                    "request_id": request_id,
                })));
            }
        }
    }

    info!(
        "Chat request {} done, response length: {} characters",
        request_id,
        response.len()
    );
    Ok(HttpResponse::Ok().json(ChatResponse { response, request_id }))
}

fn sse_event(item: Result<String, CompletionError>) -> String {
    match item {
        Ok(text) => format!("data: {}\n\n", json!({ "response": text })),
        Err(e) => format!("event: error\ndata: {}\n\n", json!({ "error": e.to_string() })),
    }
}
