//! HTTP client for the Kokoro-style TTS service
//!
//! `POST /tts` takes `{text, voice, speed, lang_code, return_phonemes}` and
//! answers `{success, message, audio_url}` where `audio_url` is relative to
//! the service. Errors come back as `{"detail": ...}` with a non-2xx status.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use url::Url;

use crate::error::{Result, SpeechError};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";

/// Audio is always generated at normal speed; speed is applied at playback
pub const GENERATION_SPEED: f32 = 1.0;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Liveness probes give up quickly
pub const HEALTH_TIMEOUT: Duration = Duration::from_secs(3);

/// Body of a synthesis request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SynthesisRequest {
    pub text: String,
    pub voice: String,
    pub speed: f32,
    pub lang_code: String,
    pub return_phonemes: bool,
}

impl SynthesisRequest {
    pub fn new(text: impl Into<String>, voice: impl Into<String>) -> Result<Self> {
        let voice = voice.into();
        let lang_code = language_code(&voice)?;

        Ok(Self {
            text: text.into(),
            voice,
            speed: GENERATION_SPEED,
            lang_code,
            return_phonemes: false,
        })
    }
}

/// Language code for a voice id: its first character (`af_heart` -> `a`)
pub fn language_code(voice: &str) -> Result<String> {
    voice
        .chars()
        .next()
        .map(String::from)
        .ok_or_else(|| SpeechError::InvalidInput("voice id cannot be empty".to_string()))
}

/// Anything that can turn text into a playable audio locator
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Request audio for one piece of text, returning an absolute locator
    async fn request_audio(&self, request: &SynthesisRequest) -> Result<String>;

    fn name(&self) -> &str;
}

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    #[serde(default)]
    pub pipelines_loaded: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TtsResponse {
    success: bool,
    #[serde(default)]
    message: Option<String>,
    audio_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VoicesResponse {
    voices: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    detail: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct TtsClient {
    base_url: Url,
    client: Client,
}

impl TtsClient {
    pub fn new(settings: &ClientSettings) -> Result<Self> {
        let mut base_url = Url::parse(&settings.base_url).map_err(|e| {
            SpeechError::Config(format!("Invalid server URL '{}': {}", settings.base_url, e))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(SpeechError::Config(format!(
                "Invalid server URL '{}'",
                settings.base_url
            )));
        }

        // Keep any path prefix when joining relative locators
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| SpeechError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { base_url, client })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Turn a locator returned by the service into an absolute URL
    pub fn resolve(&self, locator: &str) -> Result<String> {
        if let Ok(url) = Url::parse(locator) {
            return Ok(url.into());
        }

        self.base_url
            .join(locator.trim_start_matches('/'))
            .map(String::from)
            .map_err(|e| SpeechError::synthesis(format!("Bad audio locator '{}': {}", locator, e)))
    }

    pub async fn health(&self) -> Result<HealthStatus> {
        let request = self
            .client
            .get(self.endpoint("health")?)
            .timeout(HEALTH_TIMEOUT);
        let response = self.send(request).await?;
        parse_json(response).await
    }

    /// Voices grouped by language code
    pub async fn voices(&self) -> Result<BTreeMap<String, Vec<String>>> {
        let response = self.send(self.client.get(self.endpoint("voices")?)).await?;
        let body: VoicesResponse = parse_json(response).await?;
        Ok(body.voices)
    }

    /// Download the bytes behind an audio locator
    pub async fn fetch_audio(&self, locator: &str) -> Result<Vec<u8>> {
        let url = self.resolve(locator)?;
        let response = self.send(self.client.get(&url)).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| SpeechError::Transport(format!("Reading {}: {}", url, e)))?;
        Ok(bytes.to_vec())
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| SpeechError::Config(format!("Invalid endpoint '{}': {}", path, e)))
    }

    /// Send a request, mapping network failures and non-2xx statuses
    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let response = request
            .send()
            .await
            .map_err(|e| SpeechError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let error_text = response.text().await.unwrap_or_default();
        let message = match serde_json::from_str::<ErrorResponse>(&error_text) {
            Ok(ErrorResponse {
                detail: serde_json::Value::String(detail),
            }) => detail,
            Ok(ErrorResponse { detail }) => detail.to_string(),
            Err(_) if error_text.trim().is_empty() => status
                .canonical_reason()
                .unwrap_or("Request failed")
                .to_string(),
            Err(_) => error_text,
        };

        Err(SpeechError::Synthesis {
            message,
            status_code: Some(status.as_u16()),
        })
    }
}

async fn parse_json<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    response
        .json()
        .await
        .map_err(|e| SpeechError::synthesis(format!("Malformed response: {}", e)))
}

#[async_trait]
impl SpeechSynthesizer for TtsClient {
    async fn request_audio(&self, request: &SynthesisRequest) -> Result<String> {
        log::debug!(
            "Requesting audio for {} chars with voice {}",
            request.text.chars().count(),
            request.voice
        );

        let response = self
            .send(self.client.post(self.endpoint("tts")?).json(request))
            .await?;
        let body: TtsResponse = parse_json(response).await?;

        match body {
            TtsResponse {
                success: true,
                audio_url: Some(audio_url),
                ..
            } => self.resolve(&audio_url),
            TtsResponse { message, .. } => Err(SpeechError::synthesis(
                message.unwrap_or_else(|| "Failed to generate speech".to_string()),
            )),
        }
    }

    fn name(&self) -> &str {
        "kokoro"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Answer exactly one HTTP request with `status` and a JSON `body`,
    /// handing back the raw request for inspection.
    async fn serve_once(status: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let request = read_request(&mut socket).await;
            let reply = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(reply.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            request
        });

        (base, server)
    }

    async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);

            let text = String::from_utf8_lossy(&buf).to_string();
            if let Some(header_end) = text.find("\r\n\r\n") {
                let content_length = text[..header_end]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if buf.len() >= header_end + 4 + content_length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).to_string()
    }

    fn client(base_url: &str) -> TtsClient {
        TtsClient::new(&ClientSettings {
            base_url: base_url.to_string(),
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[test]
    fn test_language_code_is_first_character() {
        assert_eq!(language_code("af_heart").unwrap(), "a");
        assert_eq!(language_code("bm_isaac").unwrap(), "b");
        assert!(matches!(
            language_code(""),
            Err(SpeechError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_request_always_generates_at_normal_speed() {
        let request = SynthesisRequest::new("Hello there.", "bf_ema").unwrap();
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            serde_json::json!({
                "text": "Hello there.",
                "voice": "bf_ema",
                "speed": 1.0,
                "lang_code": "b",
                "return_phonemes": false
            })
        );
    }

    #[test]
    fn test_resolve_relative_and_absolute_locators() {
        let client = client("http://localhost:8000");
        assert_eq!(
            client.resolve("/audio/abc").unwrap(),
            "http://localhost:8000/audio/abc"
        );
        assert_eq!(
            client.resolve("https://cdn.test/a.wav").unwrap(),
            "https://cdn.test/a.wav"
        );

        let prefixed = self::client("http://tts.lan/kokoro");
        assert_eq!(
            prefixed.resolve("/audio/abc").unwrap(),
            "http://tts.lan/kokoro/audio/abc"
        );
    }

    #[test]
    fn test_invalid_base_url_is_config_error() {
        let result = TtsClient::new(&ClientSettings {
            base_url: "not a url".to_string(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
        });
        assert!(matches!(result, Err(SpeechError::Config(_))));
    }

    #[tokio::test]
    async fn test_request_audio_resolves_returned_path() {
        let (base, server) = serve_once(
            "200 OK",
            r#"{"success":true,"message":"Speech generated successfully","audio_url":"/audio/1234"}"#,
        )
        .await;

        let request = SynthesisRequest::new("Read this aloud.", "af_sky").unwrap();
        let locator = client(&base).request_audio(&request).await.unwrap();
        assert_eq!(locator, format!("{}/audio/1234", base));

        let raw = server.await.unwrap();
        assert!(raw.starts_with("POST /tts HTTP/1.1"));
        assert!(raw.contains(r#""lang_code":"a""#));
        assert!(raw.contains(r#""text":"Read this aloud.""#));
    }

    #[tokio::test]
    async fn test_error_detail_becomes_synthesis_error() {
        let (base, _server) =
            serve_once("400 Bad Request", r#"{"detail":"Text cannot be empty"}"#).await;

        let request = SynthesisRequest::new(" ", "af_heart").unwrap();
        let err = client(&base).request_audio(&request).await.unwrap_err();
        match err {
            SpeechError::Synthesis {
                message,
                status_code,
            } => {
                assert_eq!(message, "Text cannot be empty");
                assert_eq!(status_code, Some(400));
            }
            other => panic!("expected synthesis error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unsuccessful_body_is_synthesis_error() {
        let (base, _server) =
            serve_once("200 OK", r#"{"success":false,"message":"Voice unavailable"}"#).await;

        let request = SynthesisRequest::new("Hi.", "af_heart").unwrap();
        let err = client(&base).request_audio(&request).await.unwrap_err();
        assert_eq!(err.to_string(), "TTS service error: Voice unavailable");
    }

    #[tokio::test]
    async fn test_malformed_body_is_synthesis_error() {
        let (base, _server) = serve_once("200 OK", "<html>proxy error</html>").await;

        let request = SynthesisRequest::new("Hi.", "af_heart").unwrap();
        let err = client(&base).request_audio(&request).await.unwrap_err();
        assert!(err.to_string().contains("Malformed response"));
    }

    #[tokio::test]
    async fn test_unreachable_service_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let request = SynthesisRequest::new("Hi.", "af_heart").unwrap();
        let err = client(&base).request_audio(&request).await.unwrap_err();
        assert!(matches!(err, SpeechError::Transport(_)));
    }

    #[tokio::test]
    async fn test_health_and_voices() {
        let (base, _server) =
            serve_once("200 OK", r#"{"status":"healthy","pipelines_loaded":["a"]}"#).await;
        let health = client(&base).health().await.unwrap();
        assert_eq!(health.status, "healthy");
        assert_eq!(health.pipelines_loaded, vec!["a"]);

        let (base, server) = serve_once(
            "200 OK",
            r#"{"voices":{"a":["af_heart","am_adam"],"b":["bf_ema"]}}"#,
        )
        .await;
        let voices = client(&base).voices().await.unwrap();
        assert_eq!(voices["a"], vec!["af_heart", "am_adam"]);
        assert_eq!(voices["b"], vec!["bf_ema"]);
        assert!(server.await.unwrap().starts_with("GET /voices HTTP/1.1"));
    }

    #[tokio::test]
    async fn test_fetch_audio_returns_bytes() {
        let (base, _server) = serve_once("200 OK", "RIFF....WAVE").await;
        let bytes = client(&base).fetch_audio("/audio/xyz").await.unwrap();
        assert_eq!(bytes, b"RIFF....WAVE");
    }
}
