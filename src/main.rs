mod chat;
mod config;
mod error;
mod kg;
mod model;
mod web;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use actix_web::{middleware::Logger, web::Data, App, HttpServer};
use dotenv::dotenv;
use log::{error, info};
use tera::Tera;

use chat::ChatService;
use config::{GenerationDefaults, Settings};
use kg::KgClient;
use model::HostedModel;
use web::routes;

// App state structure
pub struct AppState {
    pub tera: Tera,
    pub chat: ChatService,
    pub defaults: GenerationDefaults,
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Initialize environment
    dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    info!("Starting knowledge graph chat");

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let kg = KgClient::new(settings.kg_endpoint.clone(), settings.kg_api_key.clone());
    let model = HostedModel::new(
        &settings.inference_base_url,
        settings.model_id.clone(),
        settings.inference_token.clone(),
    );
    info!("Knowledge graph endpoint: {}", settings.kg_endpoint);
    info!("Using hosted model {} at {}", settings.model_id, model.url());
    let chat = ChatService::new(Arc::new(kg), Arc::new(model));

    // Initialize template engine
    let mut tera = match Tera::new("templates/**/*") {
        Ok(t) => t,
        Err(e) => {
            error!("Template parsing error: {}", e);
            std::process::exit(1);
        }
    };
    tera.autoescape_on(vec![".html"]);

    let app_state = Data::new(AppState {
        tera,
        chat,
        defaults: settings.defaults.clone(),
    });

    info!("Listening on {}:{}", settings.bind_address, settings.port);
    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .app_data(app_state.clone())
            .configure(routes::configure)
    })
    .bind((settings.bind_address.as_str(), settings.port))?
    .run()
    .await
}
