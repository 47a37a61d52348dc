//! Out-of-band answers to login challenges.

use bytes::Bytes;

use super::qrcode::QrCodeState;
use crate::BoxFuture;

/// Supplies answers the server demands during login.
///
/// Every method may take as long as the operator needs; the engine adds no
/// timeout of its own. Returning `None` (or `false`) declines the
/// challenge, which ends the login with an error.
///
/// All methods have declining defaults so an implementation only covers
/// the challenges it can handle.
pub trait LoginSolver: Send + Sync {
    /// Text shown in the captcha `image`.
    fn solve_picture_captcha(&self, _uin: i64, _image: Bytes) -> BoxFuture<'_, Option<String>> {
        Box::pin(async { None })
    }

    /// Ticket obtained by completing the slider at `url`.
    fn solve_slider_captcha(&self, _uin: i64, _url: String) -> BoxFuture<'_, Option<String>> {
        Box::pin(async { None })
    }

    /// Whether slider captchas can be handled at all. When false the
    /// engine asks the server for a different challenge once.
    fn supports_slider(&self) -> bool {
        false
    }

    /// Confirm an unsafe-device warning after visiting `url`.
    fn confirm_unsafe_device(&self, _uin: i64, _url: String) -> BoxFuture<'_, bool> {
        Box::pin(async { false })
    }

    /// Confirm the device-lock prompt shown at `url`.
    fn confirm_device_lock(&self, _uin: i64, _url: String) -> BoxFuture<'_, bool> {
        Box::pin(async { false })
    }

    /// Code sent by SMS to `phone`.
    fn solve_sms(&self, _uin: i64, _phone: String) -> BoxFuture<'_, Option<String>> {
        Box::pin(async { None })
    }

    /// Show the login QR code to the operator.
    fn show_qr_code(&self, _uin: i64, _image: Bytes) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }

    /// QR code state changed.
    fn qr_state_changed(&self, _uin: i64, _state: QrCodeState) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }
}
