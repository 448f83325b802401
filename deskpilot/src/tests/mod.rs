mod actions_tests;
mod locator_tests;
mod popups_tests;
mod session_tests;

use crate::config::Timings;
use crate::platforms::fake::FakeDesktop;
use crate::session::Session;
use crate::{Rect, WindowHandle};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

// Initialize tracing for tests
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::DEBUG.into()))
        .with_target(true)
        .with_test_writer()
        .try_init();
}

pub fn fake_session() -> (Arc<FakeDesktop>, Session) {
    init_tracing();
    let desktop = Arc::new(FakeDesktop::new());
    let session = Session::new(desktop.clone(), Timings::immediate(), CancellationToken::new());
    (desktop, session)
}

/// Handles of the capture screen's controls.
pub struct CaptureScreen {
    pub host: WindowHandle,
    pub identifier: WindowHandle,
    pub criterion: WindowHandle,
    pub trigger: WindowHandle,
    pub order_input: WindowHandle,
}

/// Main window with the search bar near the top and the order number
/// field further down, laid out like the real capture screen.
pub fn capture_screen(desktop: &FakeDesktop) -> CaptureScreen {
    let host = desktop.add_window(
        None,
        "ThunderRT6MDIForm",
        "PISCO - Principal",
        Rect::new(0, 0, 1024, 768),
    );
    // Decoy input below the search band.
    desktop.add_window(Some(host), "Edit", "", Rect::sized(20, 300, 160, 22));
    let identifier = desktop.add_window(Some(host), "Edit", "", Rect::sized(20, 60, 160, 22));
    let criterion = desktop.add_window(
        Some(host),
        "ThunderRT6ComboBox",
        "Nombre",
        Rect::sized(200, 60, 180, 22),
    );
    desktop.configure(criterion, |w| {
        w.combo_items = Some(2);
        w.selection = Some(0);
    });
    let trigger = desktop.add_window(
        Some(host),
        "ThunderRT6PictureBox",
        "",
        Rect::sized(394, 60, 22, 22),
    );
    desktop.add_window(
        Some(host),
        "Static",
        "No Orden Servicio",
        Rect::sized(20, 400, 120, 18),
    );
    let order_input = desktop.add_window(Some(host), "Edit", "", Rect::sized(150, 400, 120, 22));
    CaptureScreen {
        host,
        identifier,
        criterion,
        trigger,
        order_input,
    }
}
