use super::fake_session;
use crate::platforms::fake::FakeEvent;
use crate::platforms::Key;
use crate::popups::{PopupCatalog, PopupKind, ACCEPT_BUTTONS};
use crate::{AutomationError, Rect};
use std::time::Duration;

#[test]
fn test_classify_known_phrases() {
    let catalog = PopupCatalog::default();
    assert_eq!(
        catalog.classify("No se encontró registro con ese criterio").0,
        PopupKind::Informational
    );
    assert_eq!(
        catalog.classify("Error '13' en tiempo de ejecución: No coinciden los tipos").0,
        PopupKind::Error
    );
    assert_eq!(
        catalog.classify("Confirmación ¿Desea guardar los registros?").0,
        PopupKind::Confirmation
    );
    let (kind, rule) = catalog.classify("Licencia por vencer");
    assert_eq!(kind, PopupKind::Unrecognized);
    assert!(rule.is_none());
}

#[test]
fn test_wait_containing_reads_static_children() {
    let (desktop, session) = fake_session();
    desktop.add_dialog("PISCO", &["Archivo procesado", "Registros cargados: 5"], &["Aceptar"]);

    let popup = session
        .popups()
        .wait_containing(&["archivo procesado"], Duration::ZERO, Duration::ZERO)
        .unwrap()
        .expect("dialog should be found");
    assert_eq!(popup.kind, PopupKind::Informational);
    assert!(popup.text.contains("Registros cargados: 5"));

    let missing = session
        .popups()
        .wait_containing(&["proceso finalizado"], Duration::ZERO, Duration::ZERO)
        .unwrap();
    assert!(missing.is_none());
}

#[test]
fn test_error_dialog_is_closed_then_reported() {
    let (desktop, session) = fake_session();
    let dialog = desktop.add_dialog("PISCO", &["Error '13' en tiempo de ejecución"], &["Aceptar"]);

    let popup = session.popups().scan().remove(0);
    let err = session.popups().dismiss(&popup).unwrap_err();

    assert!(matches!(err, AutomationError::ForeignError(ref text) if text.contains("13")));
    assert!(!desktop.is_alive(dialog));
}

#[test]
fn test_confirm_prefers_yes_button() {
    let (desktop, session) = fake_session();
    let dialog = desktop.add_dialog("Confirmación", &["¿Desea continuar?"], &["Sí", "No"]);

    session.popups().confirm(dialog).unwrap();

    assert!(!desktop.is_alive(dialog));
    let clicked: Vec<String> = desktop
        .events()
        .iter()
        .filter_map(|e| match e {
            FakeEvent::Click(h) => Some(desktop.text_of(*h)),
            _ => None,
        })
        .collect();
    assert_eq!(clicked, vec!["Sí".to_string()]);
}

#[test]
fn test_confirm_without_buttons_posts_enter() {
    let (desktop, session) = fake_session();
    let dialog = desktop.add_dialog("Confirmación", &["¿Desea continuar?"], &[]);

    session.popups().confirm(dialog).unwrap();

    assert!(!desktop.is_alive(dialog));
    assert!(desktop.events().contains(&FakeEvent::PostKey(dialog, Key::Enter)));
}

#[test]
fn test_close_preferring_falls_back_to_wm_close() {
    let (desktop, session) = fake_session();
    let dialog = desktop.add_dialog("PISCO", &["Aviso"], &["Continuar"]);

    session.popups().close_preferring(dialog, ACCEPT_BUTTONS).unwrap();

    assert!(desktop.events().contains(&FakeEvent::Close(dialog)));
    assert!(!desktop.is_alive(dialog));
}

#[test]
fn test_sweep_clears_everything_and_reports_first_error() {
    let (desktop, session) = fake_session();
    let info = desktop.add_dialog("PISCO", &["Proceso finalizado"], &["Aceptar"]);
    let error = desktop.add_dialog("PISCO", &["No coinciden los tipos"], &["Aceptar"]);

    let err = session.popups().sweep().unwrap_err();

    assert!(matches!(err, AutomationError::ForeignError(_)));
    assert!(!desktop.is_alive(info));
    assert!(!desktop.is_alive(error));
}

#[test]
fn test_close_stray_dialogs_ignores_other_windows() {
    let (desktop, session) = fake_session();
    let main = desktop.add_window(None, "ThunderRT6MDIForm", "PISCO", Rect::new(0, 0, 800, 600));
    desktop.add_dialog("PISCO", &["Uno"], &["Aceptar"]);
    desktop.add_dialog("PISCO", &["Dos"], &[]);

    assert_eq!(session.close_stray_dialogs(), 2);
    assert!(desktop.is_alive(main));
    assert!(session.popups().scan().is_empty());
}
