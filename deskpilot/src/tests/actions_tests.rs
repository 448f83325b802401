use super::{capture_screen, fake_session};
use crate::platforms::fake::{FakeEvent, TextBehavior, Trigger};
use crate::{AutomationError, Rect};
use std::time::Duration;

#[test]
fn test_set_text_verified_is_idempotent() {
    let (desktop, session) = fake_session();
    let screen = capture_screen(&desktop);
    let actions = session.actions();

    actions.set_text_verified(screen.identifier, "1032456789", 3).unwrap();
    actions.set_text_verified(screen.identifier, "1032456789", 3).unwrap();

    assert_eq!(desktop.text_of(screen.identifier), "1032456789");
    assert_eq!(actions.read_text(screen.identifier), "1032456789");
}

#[test]
fn test_set_text_falls_back_to_typing() {
    let (desktop, session) = fake_session();
    let screen = capture_screen(&desktop);
    desktop.configure(screen.identifier, |w| {
        w.text = "viejo".to_string();
        w.text_behavior = TextBehavior::IgnoresSetText;
    });

    session
        .actions()
        .set_text_verified(screen.identifier, "52111222", 2)
        .unwrap();

    assert_eq!(desktop.text_of(screen.identifier), "52111222");
    assert!(desktop
        .events()
        .iter()
        .any(|e| matches!(e, FakeEvent::Keys(_))));
}

#[test]
fn test_set_text_gives_up_on_read_only_control() {
    let (desktop, session) = fake_session();
    let screen = capture_screen(&desktop);
    desktop.configure(screen.identifier, |w| w.text_behavior = TextBehavior::ReadOnly);

    let err = session
        .actions()
        .set_text_verified(screen.identifier, "52111222", 2)
        .unwrap_err();
    assert!(matches!(err, AutomationError::ActionFailed(_)));
    assert_eq!(desktop.text_of(screen.identifier), "");
}

#[test]
fn test_select_second_of_two_items() {
    let (desktop, session) = fake_session();
    let screen = capture_screen(&desktop);

    session
        .actions()
        .select_nth_dropdown_option(screen.criterion, 1, Duration::ZERO)
        .unwrap();

    let state = desktop.state();
    assert_eq!(state.window(screen.criterion).and_then(|w| w.selection), Some(1));
    assert!(state.live_top_level("ComboLBox").is_empty(), "list must be closed");
    // Closed with Escape, never Enter.
    assert!(!state.events().iter().any(|e| match e {
        FakeEvent::Keys(keys) => keys.contains(&crate::platforms::KeyStroke::Press(crate::platforms::Key::Enter)),
        _ => false,
    }));
}

#[test]
fn test_select_fails_structurally_with_one_item() {
    let (desktop, session) = fake_session();
    let screen = capture_screen(&desktop);
    desktop.configure(screen.criterion, |w| w.combo_items = Some(1));

    let err = session
        .actions()
        .select_nth_dropdown_option(screen.criterion, 1, Duration::ZERO)
        .unwrap_err();
    assert!(matches!(err, AutomationError::StructuralMismatch(_)));
    assert_eq!(desktop.state().window(screen.criterion).and_then(|w| w.selection), Some(0));
}

#[test]
fn test_select_fails_when_list_never_opens() {
    let (desktop, session) = fake_session();
    let screen = capture_screen(&desktop);
    desktop.state().dropdowns_open = false;

    let err = session
        .actions()
        .select_nth_dropdown_option(screen.criterion, 1, Duration::ZERO)
        .unwrap_err();
    assert!(matches!(err, AutomationError::StructuralMismatch(_)));
}

#[test]
fn test_click_posts_button_activation() {
    let (desktop, session) = fake_session();
    let form = desktop.add_window(None, "ThunderRT6FormDC", "Form", Rect::new(0, 0, 400, 300));
    let button = desktop.add_window(Some(form), "ThunderRT6CommandButton", "Cargar Archivo", Rect::sized(10, 10, 100, 24));
    let picture = desktop.add_window(Some(form), "ThunderRT6PictureBox", "", Rect::sized(150, 10, 20, 20));

    session.actions().click(button).unwrap();
    session.actions().click(picture).unwrap();

    let events = desktop.events();
    assert!(events.contains(&FakeEvent::Click(button)));
    assert!(events.contains(&FakeEvent::MouseClick(picture, 10, 10)));
}

#[test]
fn test_click_center_lands_on_the_control() {
    let (desktop, session) = fake_session();
    let screen = capture_screen(&desktop);
    let clicked = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
    let flag = clicked.clone();
    desktop.on(Trigger::Click(screen.trigger), move |_| {
        flag.store(true, std::sync::atomic::Ordering::SeqCst);
    });

    session.actions().click_center(screen.trigger).unwrap();

    assert!(clicked.load(std::sync::atomic::Ordering::SeqCst));
    assert_eq!(desktop.state().focus(), Some(screen.trigger));
}
