use axum::Json;

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"ok": true}))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_returns_ok() {
        let Json(body) = health().await;
        assert_eq!(body["ok"], true);
    }
}
