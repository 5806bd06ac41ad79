//! Swagger UI page for the proxied OpenAPI document

use axum::{extract::State, response::Html};
use serde_json::Value;

use crate::AppState;

const SWAGGER_UI_VERSION: &str = "5";
const OAUTH2_REDIRECT_PATH: &str = "/docs/oauth2-redirect";

/// Render the Swagger UI HTML page
pub fn render(title: &str, openapi_url: &str, oauth2_redirect_url: &str, init_oauth: &Value) -> String {
    // Values are JSON-encoded so they are valid JavaScript literals
    let openapi_url = Value::from(openapi_url);
    let oauth2_redirect_url = Value::from(oauth2_redirect_url);

    format!(
        r##"<!DOCTYPE html>
<html>
<head>
    <link type="text/css" rel="stylesheet" href="https://cdn.jsdelivr.net/npm/swagger-ui-dist@{version}/swagger-ui.css">
    <title>{title}</title>
</head>
<body>
    <div id="swagger-ui"></div>
    <script src="https://cdn.jsdelivr.net/npm/swagger-ui-dist@{version}/swagger-ui-bundle.js"></script>
    <script>
    const ui = SwaggerUIBundle({{
        url: {openapi_url},
        dom_id: "#swagger-ui",
        layout: "BaseLayout",
        deepLinking: true,
        showExtensions: true,
        showCommonExtensions: true,
        oauth2RedirectUrl: window.location.origin + {oauth2_redirect_url},
        presets: [
            SwaggerUIBundle.presets.apis,
            SwaggerUIBundle.SwaggerUIStandalonePreset
        ],
    }})
    ui.initOAuth({init_oauth})
    </script>
</body>
</html>"##,
        version = SWAGGER_UI_VERSION,
        title = html_escape(title),
        openapi_url = openapi_url,
        oauth2_redirect_url = oauth2_redirect_url,
        init_oauth = init_oauth,
    )
}

fn html_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

pub async fn swagger_ui(State(state): State<AppState>) -> Html<String> {
    let config = &state.config;
    let openapi_url = config.public_openapi_url().unwrap_or_default();
    let oauth2_redirect_url = format!("{}{}", config.root_path, OAUTH2_REDIRECT_PATH);
    let init_oauth = Value::Object(config.swagger_ui_init_oauth.clone());

    Html(render(
        "STAC API - Swagger UI",
        &openapi_url,
        &oauth2_redirect_url,
        &init_oauth,
    ))
}
