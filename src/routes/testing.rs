use actix_web::cookie::Cookie;
use actix_web::dev::ServiceResponse;

pub(crate) const PASSWORD: &str = "correct horse";

/// Builds the full service over a throwaway database.
macro_rules! test_app {
    () => {
        test_app!($crate::database::temporary())
    };
    ($db:expr) => {
        actix_web::test::init_service(
            actix_web::App::new()
                .wrap(actix_identity::IdentityMiddleware::default())
                .wrap(
                    actix_session::SessionMiddleware::builder(
                        actix_session::storage::CookieSessionStore::default(),
                        actix_web::cookie::Key::from(&[7u8; 64]),
                    )
                    .cookie_secure(false)
                    .build(),
                )
                .app_data(actix_web::web::Data::new($db))
                .app_data(actix_web::web::Data::new($crate::config::Config {
                    bcrypt_cost: 4,
                    ..$crate::config::Config::default()
                }))
                .configure($crate::routes::configure),
        )
        .await
    };
}

/// Sends a request, optionally with a session cookie.
macro_rules! send {
    ($app:expr, $req:expr) => {
        actix_web::test::call_service(&$app, $req.to_request()).await
    };
    ($app:expr, $req:expr, $cookie:expr) => {
        actix_web::test::call_service(&$app, $req.cookie($cookie.clone()).to_request()).await
    };
}

/// Registers a user and returns their session cookie.
macro_rules! register {
    ($app:expr, $name:expr) => {{
        let resp = send!(
            $app,
            actix_web::test::TestRequest::post()
                .uri("/api/register")
                .set_json(serde_json::json!({
                    "username": $name,
                    "password": $crate::routes::testing::PASSWORD,
                }))
        );
        assert_eq!(resp.status(), actix_web::http::StatusCode::CREATED);
        $crate::routes::testing::session_cookie(&resp)
    }};
}

/// Mirrors a catalog film and returns its id.
macro_rules! add_film {
    ($app:expr, $cookie:expr, $catalog_id:expr, $title:expr) => {{
        let resp = send!(
            $app,
            actix_web::test::TestRequest::post()
                .uri("/api/films")
                .set_json(serde_json::json!({
                    "catalog_id": $catalog_id,
                    "title": $title,
                })),
            $cookie
        );
        assert!(resp.status().is_success());
        let body: serde_json::Value = actix_web::test::read_body_json(resp).await;
        body["id"].as_u64().unwrap()
    }};
}

macro_rules! body {
    ($resp:expr) => {{
        let body: serde_json::Value = actix_web::test::read_body_json($resp).await;
        body
    }};
}

pub(crate) fn session_cookie<B>(resp: &ServiceResponse<B>) -> Cookie<'static> {
    resp.response()
        .cookies()
        .next()
        .expect("session cookie")
        .into_owned()
}
