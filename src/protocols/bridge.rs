//! Script bridge wire format.
//!
//! Page script talks to the host over two named channels. Bodies are
//! decoded once, here, into `BridgeMessage`; nothing past this module sees
//! channel names or raw JSON.

use base64::Engine;
use chrono::NaiveDateTime;
use image::ImageFormat;
use serde::Deserialize;

use crate::api::types::ApiError;

pub const SAVE_IMAGE_CHANNEL: &str = "saveBase64ImageHandler";
pub const DISMISS_CHANNEL: &str = "hideContentViewHandler";

/// Channels registered on every document load.
pub const MESSAGE_CHANNELS: [&str; 2] = [SAVE_IMAGE_CHANNEL, DISMISS_CHANNEL];

/// Messages page script can send to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeMessage {
    /// Save an edited image (`"<header>,<base64>"`), optionally closing the editor
    SaveImage { payload: String, close_after: bool },
    /// Close the editor without saving
    Dismiss,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SaveImageBody {
    base64_string: String,
    #[serde(default = "default_close_window")]
    close_window: bool,
}

fn default_close_window() -> bool {
    true
}

impl BridgeMessage {
    /// Decode a message posted on `channel`.
    ///
    /// The save channel accepts `{ base64String, closeWindow? }` or a bare
    /// string; `closeWindow` defaults to `true`.
    pub fn decode(channel: &str, body: serde_json::Value) -> Result<Self, ApiError> {
        match channel {
            SAVE_IMAGE_CHANNEL => {
                let body = match body {
                    serde_json::Value::String(payload) => SaveImageBody {
                        base64_string: payload,
                        close_window: true,
                    },
                    other => serde_json::from_value::<SaveImageBody>(other).map_err(|e| {
                        ApiError::MalformedPayload {
                            message: format!("Invalid save message: {e}"),
                        }
                    })?,
                };
                Ok(BridgeMessage::SaveImage {
                    payload: body.base64_string,
                    close_after: body.close_window,
                })
            }
            DISMISS_CHANNEL => Ok(BridgeMessage::Dismiss),
            other => Err(ApiError::MalformedPayload {
                message: format!("Unknown message channel: {other}"),
            }),
        }
    }
}

fn js_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

/// Script injected at document start on every load.
///
/// Exposes the current image as `window.shottyImageBase64` and binds
/// `window.saveShottyImage` / `window.dismissShotty` to the message channels.
pub fn bootstrap_script(image_base64: &str) -> String {
    format!(
        r#"(function () {{
  window.shottyImageBase64 = {image};
  window.saveShottyImage = function (payload, closeWindow) {{
    var body = typeof payload === "string"
      ? {{ base64String: payload, closeWindow: closeWindow !== false }}
      : payload;
    window.shottyHost.postMessage({save}, body);
  }};
  window.dismissShotty = function () {{
    window.shottyHost.postMessage({dismiss}, null);
  }};
}})();"#,
        image = js_string(image_base64),
        save = js_string(SAVE_IMAGE_CHANNEL),
        dismiss = js_string(DISMISS_CHANNEL),
    )
}

/// Script evaluated on every image change in an already loaded document.
///
/// Safe when the page never defined `window.onShottyImage`.
pub fn image_change_script(image_base64: &str) -> String {
    format!(
        r#"window.shottyImageBase64 = {image};
if (typeof window.onShottyImage === "function") {{ window.onShottyImage(window.shottyImageBase64); }}"#,
        image = js_string(image_base64),
    )
}

/// Image bytes recovered from a save payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub bytes: Vec<u8>,
    /// File extension for the sniffed format
    pub extension: &'static str,
}

/// Decode a `"<header>,<base64>"` save payload.
///
/// Everything up to the first comma is ignored. Fails with
/// `MalformedPayload` on a missing comma, bad base64 or bytes that are not
/// a supported image.
pub fn decode_payload(payload: &str) -> Result<DecodedImage, ApiError> {
    let (_, data) = payload
        .split_once(',')
        .ok_or_else(|| ApiError::MalformedPayload {
            message: "Missing payload delimiter".to_string(),
        })?;

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(data.trim())
        .map_err(|e| ApiError::MalformedPayload {
            message: format!("Invalid base64: {e}"),
        })?;

    let format = image::guess_format(&bytes).map_err(|e| ApiError::MalformedPayload {
        message: format!("Unrecognised image data: {e}"),
    })?;

    let extension = match format {
        ImageFormat::Png => "png",
        ImageFormat::Jpeg => "jpg",
        ImageFormat::Gif => "gif",
        ImageFormat::Bmp => "bmp",
        ImageFormat::Tiff => "tiff",
        ImageFormat::WebP => "webp",
        other => {
            return Err(ApiError::MalformedPayload {
                message: format!("Unsupported image format: {other:?}"),
            })
        }
    };

    Ok(DecodedImage { bytes, extension })
}

/// `shotty-YYYY-MM-DD-HH-mm-ss.<ext>`
pub fn save_file_name(at: NaiveDateTime, extension: &str) -> String {
    format!("shotty-{}.{extension}", at.format("%Y-%m-%d-%H-%M-%S"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    fn png_data_url() -> (String, Vec<u8>) {
        let mut bytes = Vec::new();
        image::DynamicImage::new_rgba8(3, 2)
            .write_to(&mut std::io::Cursor::new(&mut bytes), ImageFormat::Png)
            .expect("encode png");
        let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
        (format!("data:image/png;base64,{encoded}"), bytes)
    }

    #[test]
    fn test_decode_save_message() {
        let message = BridgeMessage::decode(
            SAVE_IMAGE_CHANNEL,
            json!({ "base64String": "data:image/png;base64,AAAA", "closeWindow": false }),
        )
        .unwrap();
        assert_eq!(
            message,
            BridgeMessage::SaveImage {
                payload: "data:image/png;base64,AAAA".to_string(),
                close_after: false
            }
        );

        // closeWindow defaults to true
        let message =
            BridgeMessage::decode(SAVE_IMAGE_CHANNEL, json!({ "base64String": "x,y" })).unwrap();
        assert!(matches!(
            message,
            BridgeMessage::SaveImage {
                close_after: true,
                ..
            }
        ));

        let message = BridgeMessage::decode(SAVE_IMAGE_CHANNEL, json!("x,y")).unwrap();
        assert!(matches!(
            message,
            BridgeMessage::SaveImage {
                close_after: true,
                ..
            }
        ));
    }

    #[test]
    fn test_decode_dismiss_and_unknown() {
        assert_eq!(
            BridgeMessage::decode(DISMISS_CHANNEL, serde_json::Value::Null).unwrap(),
            BridgeMessage::Dismiss
        );
        assert!(matches!(
            BridgeMessage::decode("evalHandler", json!({})),
            Err(ApiError::MalformedPayload { .. })
        ));
        assert!(matches!(
            BridgeMessage::decode(SAVE_IMAGE_CHANNEL, json!({ "closeWindow": true })),
            Err(ApiError::MalformedPayload { .. })
        ));
    }

    #[test]
    fn test_scripts_quote_payload() {
        let script = bootstrap_script("iVBORw0KGgo=");
        assert!(script.contains(r#"window.shottyImageBase64 = "iVBORw0KGgo=";"#));
        assert!(script.contains(r#"postMessage("saveBase64ImageHandler", body)"#));
        assert!(script.contains(r#"postMessage("hideContentViewHandler", null)"#));

        let script = image_change_script("abc'\"</script>");
        assert!(script.contains(r#"window.shottyImageBase64 = "abc'\"</script>";"#));
        assert!(script.contains("typeof window.onShottyImage === \"function\""));
    }

    #[test]
    fn test_decode_payload_png() {
        let (payload, bytes) = png_data_url();
        let decoded = decode_payload(&payload).unwrap();
        assert_eq!(decoded.extension, "png");
        assert_eq!(decoded.bytes, bytes);
    }

    #[test]
    fn test_decode_payload_malformed() {
        for payload in [
            "not-a-valid-base64,!!!",
            "no delimiter at all",
            "data:image/png;base64,aGVsbG8gd29ybGQ=",
        ] {
            assert!(
                matches!(decode_payload(payload), Err(ApiError::MalformedPayload { .. })),
                "payload should be rejected: {payload}"
            );
        }
    }

    #[test]
    fn test_save_file_name() {
        let at = NaiveDate::from_ymd_opt(2024, 3, 5)
            .unwrap()
            .and_hms_opt(14, 7, 9)
            .unwrap();
        assert_eq!(save_file_name(at, "png"), "shotty-2024-03-05-14-07-09.png");
    }
}
