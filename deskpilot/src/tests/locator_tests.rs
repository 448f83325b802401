//! Tests for descriptor scoring and the polling locator

use super::{capture_screen, fake_session};
use crate::descriptor::{
    Anchor, ClassPattern, ControlDescriptor, Penalties, Preference, Region, TextMatch, TitleMatch,
    WindowQuery,
};
use crate::session::{assemble_search_group, pick_order_number};
use crate::{ControlSnapshot, Rect, WindowHandle};
use std::time::Duration;

fn snapshot(handle: isize, class_name: &str, text: &str, rect: Rect) -> ControlSnapshot {
    ControlSnapshot {
        handle: WindowHandle(handle),
        class_name: class_name.to_string(),
        text: text.to_string(),
        rect,
        visible: true,
        enabled: true,
    }
}

#[test]
fn test_locate_returns_none_when_nothing_matches() {
    let (desktop, session) = fake_session();
    let window = desktop.add_window(None, "ThunderRT6FormDC", "Vacia", Rect::new(0, 0, 400, 300));
    desktop.add_window(Some(window), "Static", "Etiqueta", Rect::sized(10, 10, 80, 18));

    let descriptor = ControlDescriptor::of_classes(["Edit"]);
    assert_eq!(session.locator().locate(window, &descriptor, Duration::ZERO), None);
    assert!(session.locator().find_once(window, &descriptor).is_none());
}

#[test]
fn test_hidden_and_disabled_controls_are_skipped() {
    let (desktop, session) = fake_session();
    let window = desktop.add_window(None, "ThunderRT6FormDC", "Form", Rect::new(0, 0, 400, 300));
    let hidden = desktop.add_window(Some(window), "ThunderRT6CommandButton", "Guardar", Rect::sized(10, 10, 80, 24));
    desktop.configure(hidden, |w| w.visible = false);
    let disabled = desktop.add_window(Some(window), "ThunderRT6CommandButton", "Guardar", Rect::sized(10, 40, 80, 24));
    desktop.configure(disabled, |w| w.enabled = false);

    let descriptor = ControlDescriptor::of_classes(["ThunderRT6CommandButton"])
        .with_text(TextMatch::Exact("guardar".to_string()))
        .enabled_only();
    assert_eq!(session.locator().locate(window, &descriptor, Duration::ZERO), None);

    let enabled = desktop.add_window(Some(window), "ThunderRT6CommandButton", " Guardar ", Rect::sized(10, 70, 80, 24));
    assert_eq!(
        session.locator().locate(window, &descriptor, Duration::ZERO),
        Some(enabled)
    );
}

#[test]
fn test_wrapper_is_replaced_by_largest_inner_match() {
    let (desktop, session) = fake_session();
    let window = desktop.add_window(None, "ThunderRT6FormDC", "Datos", Rect::new(0, 0, 800, 600));
    let wrapper = desktop.add_window(Some(window), "ATL:0045F2A8", "", Rect::sized(10, 10, 760, 540));
    desktop.add_window(Some(wrapper), "SysListView32", "", Rect::sized(12, 12, 100, 100));
    let grid = desktop.add_window(Some(wrapper), "SysListView32", "", Rect::sized(12, 120, 700, 400));

    let descriptor = ControlDescriptor::of_classes(["SysListView32", "MSFlexGridWndClass"])
        .with_wrapper(ClassPattern::Prefix("ATL:".to_string()))
        .prefer(Preference::LargestArea);
    let found = session.locator().find_once(window, &descriptor);
    assert_eq!(found.map(|s| s.handle), Some(grid));
}

#[test]
fn test_anchor_prefers_nearest_on_the_same_row() {
    let reference = Rect::sized(200, 60, 180, 22);
    let candidates = vec![
        snapshot(1, "Edit", "", Rect::sized(10, 60, 100, 22)),
        snapshot(2, "Edit", "", Rect::sized(60, 64, 120, 22)),
        snapshot(3, "Edit", "", Rect::sized(90, 90, 100, 22)),
        // Overlaps the reference, so it is not to its left.
        snapshot(4, "Edit", "", Rect::sized(150, 60, 100, 22)),
    ];
    let descriptor = ControlDescriptor::of_classes(["Edit"]).anchored(Anchor::LeftOf(reference), 3);

    let ranked: Vec<isize> = descriptor
        .ranked(&candidates, None)
        .into_iter()
        .map(|(_, c)| c.handle.0)
        .collect();
    // gaps: #1 90+0, #2 20+12, #3 10+90
    assert_eq!(ranked, vec![2, 1, 3]);
}

#[test]
fn test_region_filters_relative_to_root() {
    let root = Rect::new(100, 100, 900, 700);
    let descriptor = ControlDescriptor::of_classes(["ComboBox"])
        .in_region(Region::TopBand { height: 220 })
        .prefer(Preference::Widest);
    let candidates = vec![
        snapshot(1, "ComboBox", "", Rect::sized(110, 150, 150, 22)),
        snapshot(2, "ComboBox", "", Rect::sized(110, 330, 400, 22)),
        snapshot(3, "ComboBox", "", Rect::sized(300, 310, 200, 22)),
    ];
    let best = descriptor.best(&candidates, Some(&root));
    assert_eq!(best.map(|c| c.handle.0), Some(3));
}

#[test]
fn test_squareness_penalty_picks_the_icon() {
    let reference = Rect::sized(200, 60, 180, 22);
    let descriptor = ControlDescriptor::of_classes(["Button", "Static"])
        .max_size(60, 60)
        .anchored(
            Anchor::RightOf {
                reference,
                slack: 5,
            },
            1,
        )
        .with_penalties(Penalties {
            squareness: 1,
            ..Default::default()
        });
    let candidates = vec![
        snapshot(1, "Static", "Buscar", Rect::sized(384, 60, 58, 18)),
        snapshot(2, "Button", "", Rect::sized(392, 60, 22, 22)),
    ];
    assert_eq!(descriptor.best(&candidates, None).map(|c| c.handle.0), Some(2));
}

#[test]
fn test_search_group_assembles_from_geometry() {
    let (desktop, session) = fake_session();
    let screen = capture_screen(&desktop);
    let controls = session.locator().visible_descendants(screen.host);
    let host_rect = Rect::new(0, 0, 1024, 768);

    let group = assemble_search_group(&controls, &host_rect).expect("group should assemble");
    assert_eq!(group.identifier.handle, screen.identifier);
    assert_eq!(group.criterion.handle, screen.criterion);
    assert_eq!(group.trigger.handle, screen.trigger);
}

#[test]
fn test_search_group_requires_every_member() {
    let (desktop, session) = fake_session();
    let screen = capture_screen(&desktop);
    desktop.configure(screen.trigger, |w| w.visible = false);
    let controls = session.locator().visible_descendants(screen.host);

    let err = assemble_search_group(&controls, &Rect::new(0, 0, 1024, 768)).unwrap_err();
    assert!(matches!(err, crate::AutomationError::StructuralMismatch(_)));
}

#[test]
fn test_search_trigger_must_sit_right_of_the_selector() {
    let host = Rect::new(0, 0, 1024, 768);
    let mut controls = vec![
        snapshot(1, "ThunderRT6PictureBox", "", Rect::sized(2, 62, 16, 16)),
        snapshot(2, "Edit", "", Rect::sized(20, 60, 160, 22)),
        snapshot(3, "ThunderRT6ComboBox", "Nombre", Rect::sized(200, 60, 180, 22)),
    ];

    let err = assemble_search_group(&controls, &host).unwrap_err();
    assert!(matches!(err, crate::AutomationError::StructuralMismatch(_)));

    controls.push(snapshot(4, "ThunderRT6PictureBox", "", Rect::sized(394, 60, 22, 22)));
    let group = assemble_search_group(&controls, &host).expect("group should assemble");
    assert_eq!(group.trigger.handle, WindowHandle(4));
}

#[test]
fn test_order_number_read_beside_its_label() {
    let (desktop, session) = fake_session();
    let screen = capture_screen(&desktop);
    desktop.configure(screen.order_input, |w| w.text = "01-2345-67".to_string());
    let controls = session.locator().visible_descendants(screen.host);

    let order = pick_order_number(&controls, |c| desktop.text_of(c.handle));
    assert_eq!(order.as_deref(), Some("01-2345-67"));
}

#[test]
fn test_order_number_falls_back_to_its_shape() {
    let controls = vec![
        snapshot(1, "Edit", "", Rect::sized(20, 60, 160, 22)),
        snapshot(2, "ThunderRT6MaskedEdit", "", Rect::sized(500, 500, 100, 22)),
    ];
    let order = pick_order_number(&controls, |c| match c.handle.0 {
        1 => "1234567".to_string(),
        _ => "12-345-67".to_string(),
    });
    assert_eq!(order.as_deref(), Some("12-345-67"));
}

#[test]
fn test_window_queries() {
    let (desktop, session) = fake_session();
    desktop.add_window(None, "ThunderRT6FormDC", "Ingreso al Sistema", Rect::new(0, 0, 300, 200));
    let hidden = desktop.add_window(None, "ThunderRT6FormDC", "Migración Servicios desde Excel", Rect::new(0, 0, 300, 200));
    desktop.configure(hidden, |w| w.visible = false);

    let query = WindowQuery::titled(TitleMatch::Contains("migracion servicios".to_string()));
    assert_eq!(session.locator().find_window(&query), None);

    desktop.configure(hidden, |w| w.visible = true);
    assert_eq!(session.locator().find_window(&query), Some(hidden));
    assert_eq!(
        session
            .locator()
            .wait_window(&query, Duration::ZERO)
            .unwrap(),
        Some(hidden)
    );
}

#[test]
fn test_describe_tree_lists_largest_first() {
    let (desktop, session) = fake_session();
    let window = desktop.add_window(None, "ThunderRT6FormDC", "Datos", Rect::new(0, 0, 800, 600));
    desktop.add_window(Some(window), "Static", "chico", Rect::sized(0, 0, 10, 10));
    desktop.add_window(Some(window), "MSFlexGridWndClass", "", Rect::sized(0, 20, 700, 500));

    let lines = session.locator().describe_tree(window, 2);
    assert_eq!(lines.len(), 2);
    assert!(lines[0].contains("ThunderRT6FormDC"));
    assert!(lines[1].contains("MSFlexGridWndClass"));
}
