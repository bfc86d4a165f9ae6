use http::StatusCode;

/// Domain errors that the HTTP layer knows how to render
///
/// Library crates implement this for their error enums so that axum
/// handlers can build responses without the domain depending on axum.
pub trait HttpError: std::error::Error {
    /// Status code to answer with
    fn status_code(&self) -> StatusCode;

    /// Machine-readable error kind (e.g. `config_error`)
    fn error_type(&self) -> &str;

    /// Message safe to show to API consumers
    fn client_message(&self) -> String;

    /// JSON body in the `{"error": {"type", "message"}}` envelope
    fn to_body(&self) -> serde_json::Value {
        serde_json::json!({
            "error": {
                "type": self.error_type(),
                "message": self.client_message(),
            }
        })
    }
}
