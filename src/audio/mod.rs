//! Voice input and output.
//!
//! [`recorder`] captures microphone audio through an [`recorder::AudioDevice`];
//! [`speech`] reads bot messages aloud one at a time.

use std::net::IpAddr;

pub mod ffmpeg;
pub mod recorder;
pub mod speech;

#[cfg(test)]
pub mod mock;

pub use ffmpeg::FfmpegDevice;
pub use recorder::{AudioDevice, Recorder, RecorderError, Recording};
pub use speech::{CommandSynthesizer, SpeechQueue};

/// Microphone capture is only offered when the assistant is reached over a
/// secure origin: HTTPS, or plain HTTP to the loopback host.
pub fn is_secure_origin(base_url: &str) -> bool {
    let Ok(url) = reqwest::Url::parse(base_url) else {
        return false;
    };
    match url.scheme() {
        "https" => true,
        "http" => url.host_str().is_some_and(|host| {
            host.eq_ignore_ascii_case("localhost")
                || host
                    .trim_start_matches('[')
                    .trim_end_matches(']')
                    .parse::<IpAddr>()
                    .is_ok_and(|ip| ip.is_loopback())
        }),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secure_origins() {
        assert!(is_secure_origin("https://insura.example.com"));
        assert!(is_secure_origin("http://127.0.0.1:8000"));
        assert!(is_secure_origin("http://localhost:8000"));
        assert!(is_secure_origin("http://[::1]:8000"));
    }

    #[test]
    fn test_insecure_origins() {
        assert!(!is_secure_origin("http://insura.example.com"));
        assert!(!is_secure_origin("http://192.168.1.20:8000"));
        assert!(!is_secure_origin("not a url"));
        assert!(!is_secure_origin("ftp://localhost"));
    }
}
