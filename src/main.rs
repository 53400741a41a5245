mod auth;
mod config;
mod database;
mod error;
mod feed;
mod fts_tree;
mod model;
mod recommend;
mod routes;

use actix_identity::IdentityMiddleware;
use actix_session::{storage::CookieSessionStore, SessionMiddleware};
use actix_web::{cookie::Key, middleware::Logger, web, App, HttpServer};
use anyhow::Context;
use config::Config;

const SESSION_COOKIE: &str = "id";

#[actix_rt::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("cinelog=debug,actix_web=info"),
    )
    .init();

    let config = Config::from_env()?;
    let db = if config.temporary {
        log::warn!("using a temporary database");
        sled::Config::new().temporary(true).open()
    } else {
        sled::open(&config.db_path)
    }
    .with_context(|| format!("could not open database at {}", config.db_path))?;

    let key = match &config.session_key {
        Some(key) => Key::from(key),
        None => {
            log::warn!("CINELOG_SESSION_KEY not set, sessions will not survive a restart");
            Key::generate()
        }
    };

    let bind_addr = config.bind_addr();
    log::info!("listening on {}", bind_addr);
    let db = web::Data::new(db);
    let settings = web::Data::new(config.clone());
    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(IdentityMiddleware::default())
            .wrap(
                SessionMiddleware::builder(CookieSessionStore::default(), key.clone())
                    .cookie_name(SESSION_COOKIE.to_owned())
                    .cookie_secure(config.secure_cookie)
                    .build(),
            )
            .app_data(db.clone())
            .app_data(settings.clone())
            .configure(routes::configure)
    })
    .bind(&bind_addr)
    .with_context(|| format!("could not bind {}", bind_addr))?
    .run()
    .await?;
    Ok(())
}
