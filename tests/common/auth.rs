use wrapped_backend::auth::{sign_jwt_for_user, INTERNAL_TOKEN_HEADER};

use super::app::TestApp;

pub fn auth_header(token: &str) -> String {
    format!("Bearer {token}")
}

pub fn user_token(app: &TestApp, user_id: &str) -> String {
    sign_jwt_for_user(user_id, &app.config.jwt_secret, 1).expect("sign token")
}

pub fn bearer(app: &TestApp, user_id: &str) -> [(&'static str, String); 1] {
    [("authorization", auth_header(&user_token(app, user_id)))]
}

pub fn internal(app: &TestApp) -> [(&'static str, String); 1] {
    [(INTERNAL_TOKEN_HEADER, app.config.internal_api_token.clone())]
}
