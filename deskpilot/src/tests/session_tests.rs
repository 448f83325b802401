//! Session protocol tests against a scripted fake of the driven application

use super::{capture_screen, fake_session, CaptureScreen};
use crate::artifacts::CsvTable;
use crate::config::{AppConfig, LoginConfig};
use crate::platforms::fake::{FakeDesktop, FakeEvent, Trigger};
use crate::platforms::{Key, KeyStroke};
use crate::session::{parse_grid_text, LoadReport, Outcome, SearchState, Teardown};
use crate::{AutomationError, Rect, WindowHandle};
use std::cell::Cell;

fn app_config() -> AppConfig {
    AppConfig {
        exe_path: "C:/PISCO/pisco.exe".into(),
        login_title_re: "(?i)^ingreso.*".to_string(),
        main_title_re: "(?i).*pisco.*principal.*".to_string(),
        main_load_timeout_secs: 0,
        ..Default::default()
    }
}

struct MigrationWindow {
    window: WindowHandle,
    load: WindowHandle,
    save: WindowHandle,
}

fn migration_window(desktop: &FakeDesktop) -> MigrationWindow {
    let window = desktop.add_window(
        None,
        "ThunderRT6FormDC",
        "Migración Servicios desde Excel",
        Rect::new(50, 50, 750, 550),
    );
    let load = desktop.add_window(Some(window), "ThunderRT6CommandButton", "Cargar Archivo", Rect::sized(60, 480, 120, 28));
    let save = desktop.add_window(Some(window), "ThunderRT6CommandButton", "Guardar Masivo", Rect::sized(200, 480, 120, 28));
    MigrationWindow { window, load, save }
}

fn buttons_clicked(desktop: &FakeDesktop) -> Vec<String> {
    desktop
        .events()
        .iter()
        .filter_map(|e| match e {
            FakeEvent::Click(h) => Some(desktop.text_of(*h)),
            _ => None,
        })
        .collect()
}

#[test]
fn test_open_session_fills_login_and_waits_for_main() {
    let (desktop, session) = fake_session();
    let login = desktop.add_window(None, "ThunderRT6FormDC", "Ingreso al Sistema", Rect::new(300, 200, 600, 400));
    desktop.configure(login, |w| w.visible = false);
    let user = desktop.add_window(Some(login), "Edit", "", Rect::sized(400, 250, 150, 22));
    let password = desktop.add_window(Some(login), "Edit", "", Rect::sized(400, 280, 150, 22));
    let main = desktop.add_window(None, "ThunderRT6MDIForm", "PISCO - Principal", Rect::new(0, 0, 1024, 768));
    desktop.configure(main, |w| w.visible = false);

    desktop.once(Trigger::Launch, move |state| {
        if let Some(w) = state.window_mut(login) {
            w.visible = true;
        }
    });
    desktop.once(Trigger::Key(Key::Enter), move |state| {
        if let Some(w) = state.window_mut(main) {
            w.visible = true;
        }
    });

    let credentials = LoginConfig {
        user: "operador".to_string(),
        password: "clave".to_string(),
    };
    let opened = session.open_session(&app_config(), &credentials).unwrap();

    assert_eq!(opened, main);
    assert_eq!(desktop.text_of(user), "operador");
    assert_eq!(desktop.text_of(password), "clave");
    let events = desktop.events();
    assert!(events.contains(&FakeEvent::Kill("pisco.exe".to_string())));
    assert!(events.contains(&FakeEvent::Launch("C:/PISCO/pisco.exe".into(), false)));
    assert!(events.contains(&FakeEvent::Keys(vec![
        KeyStroke::Press(Key::Enter),
        KeyStroke::Press(Key::Enter)
    ])));
}

#[test]
fn test_login_window_timeout_is_reported() {
    let (_desktop, session) = fake_session();
    let err = session.wait_login_window(&app_config()).unwrap_err();
    assert!(matches!(err, AutomationError::Timeout(_)));
}

#[test]
fn test_open_migration_through_menu() {
    let (desktop, session) = fake_session();
    let main = desktop.add_window(None, "ThunderRT6MDIForm", "PISCO - Principal", Rect::new(0, 0, 1024, 768));
    let migration = migration_window(&desktop);
    desktop.configure(migration.window, |w| w.visible = false);
    let target = migration.window;
    desktop.on(
        Trigger::Menu("Operaciones->Migracion Servicios desde Excel".to_string()),
        move |state| {
            if let Some(w) = state.window_mut(target) {
                w.visible = true;
            }
        },
    );

    assert_eq!(session.open_migration(main).unwrap(), migration.window);
}

#[test]
fn test_missing_menu_item_is_an_error() {
    let (desktop, session) = fake_session();
    let main = desktop.add_window(None, "ThunderRT6MDIForm", "PISCO - Principal", Rect::new(0, 0, 1024, 768));
    assert!(session.open_migration(main).is_err());
}

#[test]
fn test_open_capture_accepts_month_prompt() {
    let (desktop, session) = fake_session();
    let screen = capture_screen(&desktop);
    desktop.on(Trigger::Menu("Archivo->Capturar Servicios".to_string()), |state| {
        state.add_dialog("PISCO", &["Mes a Visualizar Servicios"], &["Aceptar", "Cancelar"]);
    });

    session.open_capture(screen.host).unwrap();

    assert_eq!(buttons_clicked(&desktop), vec!["Aceptar".to_string()]);
    assert!(session.popups().scan().is_empty());
}

#[test]
fn test_load_file_reads_counters_and_dismisses_once() {
    let (desktop, session) = fake_session();
    let migration = migration_window(&desktop);
    desktop.once(Trigger::Click(migration.load), |state| {
        state.add_dialog("Abrir", &[], &["Abrir", "Cancelar"]);
    });
    desktop.once(Trigger::Key(Key::Enter), |state| {
        for dialog in state.live_top_level("#32770") {
            state.destroy(dialog);
        }
        state.add_dialog(
            "PISCO",
            &["Archivo procesado", "Registros cargados: 5", "Registros inválidos: 2"],
            &["Aceptar"],
        );
    });

    let report = session
        .load_file(migration.window, std::path::Path::new("C:/robot/pendientes.csv"))
        .unwrap();

    assert_eq!(report, LoadReport { loaded: 5, invalid: 2 });
    assert_eq!(
        buttons_clicked(&desktop),
        vec!["Cargar Archivo".to_string(), "Aceptar".to_string()]
    );
    assert!(desktop.events().iter().any(|e| matches!(
        e,
        FakeEvent::Keys(keys) if keys.contains(&KeyStroke::text("C:/robot/pendientes.csv"))
    )));
    assert!(session.popups().scan().is_empty());
}

#[test]
fn test_load_report_parsing() {
    assert_eq!(
        LoadReport::parse("Archivo procesado. REGISTROS CARGADOS : 12  Registros Inválidos:0"),
        LoadReport { loaded: 12, invalid: 0 }
    );
    assert_eq!(LoadReport::parse("Archivo procesado"), LoadReport::default());
}

fn script_save(desktop: &FakeDesktop, migration: &MigrationWindow, result: &'static str) {
    let confirmation = desktop.add_dialog("Confirmación", &["¿Desea guardar los registros?"], &["Sí", "No"]);
    desktop.configure(confirmation, |w| w.visible = false);
    desktop.once(Trigger::Click(migration.save), move |state| {
        if let Some(w) = state.window_mut(confirmation) {
            w.visible = true;
        }
    });
    let yes = {
        let state = desktop.state();
        let found = state
            .window(confirmation)
            .and_then(|w| w.children.iter().copied().find(|h| state.text_of(*h) == "Sí"));
        found
    };
    if let Some(yes) = yes {
        desktop.once(Trigger::Click(yes), move |state| {
            state.add_dialog("PISCO", &[result], &["Aceptar"]);
        });
    }
}

#[test]
fn test_bulk_save_success() {
    let (desktop, session) = fake_session();
    let migration = migration_window(&desktop);
    script_save(&desktop, &migration, "Proceso finalizado");

    let outcome = session.bulk_save(migration.window).unwrap();

    assert!(outcome.is_success());
    assert_eq!(
        buttons_clicked(&desktop),
        vec!["Guardar Masivo".to_string(), "Sí".to_string(), "Aceptar".to_string()]
    );
}

#[test]
fn test_bulk_save_with_errors_is_a_validation_error() {
    let (desktop, session) = fake_session();
    let migration = migration_window(&desktop);
    script_save(&desktop, &migration, "Proceso finalizado con errores");

    let outcome = session.bulk_save(migration.window).unwrap();

    assert_eq!(
        outcome,
        Outcome::ValidationError {
            code: "con errores".to_string()
        }
    );
}

#[test]
fn test_bulk_save_without_button_is_structural() {
    let (desktop, session) = fake_session();
    let migration = migration_window(&desktop);
    desktop.configure(migration.save, |w| w.enabled = false);

    let err = session.bulk_save(migration.window).unwrap_err();
    assert!(matches!(err, AutomationError::StructuralMismatch(_)));
    assert!(buttons_clicked(&desktop).is_empty());
}

fn write_loaded_csv(dir: &std::path::Path) -> std::path::PathBuf {
    let path = dir.join("Prestacion_Pendiente_093000.csv");
    CsvTable::new(
        vec!["Nombre".to_string(), "N° Prestacion".to_string(), "CC: Del Fallecido".to_string()],
        vec![
            vec!["Ana".to_string(), String::new(), "111".to_string()],
            vec!["Luis".to_string(), String::new(), "222".to_string()],
        ],
        b';',
    )
    .write(&path)
    .unwrap();
    path
}

#[test]
fn test_capture_errors_from_list_view() {
    let (desktop, session) = fake_session();
    let dir = tempfile::tempdir().unwrap();
    let csv_path = write_loaded_csv(dir.path());

    let datos = desktop.add_window(None, "ThunderRT6FormDC", "Datos", Rect::new(0, 0, 800, 600));
    let wrapper = desktop.add_window(Some(datos), "ATL:0045F2A8", "", Rect::sized(10, 10, 760, 540));
    let grid = desktop.add_window(Some(wrapper), "SysListView32", "", Rect::sized(12, 12, 700, 500));
    desktop.configure(grid, |w| {
        w.cells = Some(vec![
            vec!["1".into(), "111".into(), "Ana".into(), "Cedula ya existe".into()],
            vec!["2".into(), "222".into(), "Luis".into(), "Fecha invalida".into()],
        ])
    });

    let capture = session.capture_errors(&csv_path).unwrap();

    assert_eq!(capture.errors, vec!["Cedula ya existe", "Fecha invalida"]);
    assert_eq!(capture.csv_path, dir.path().join("Prestacion_Pendiente_093000_ERRORES.csv"));
    let written = CsvTable::read(&capture.csv_path).unwrap();
    assert_eq!(written.value(0, 1), "Cedula ya existe");
    assert_eq!(written.value(1, 1), "Fecha invalida");
    assert!(!desktop.is_alive(datos));
}

#[test]
fn test_capture_errors_through_clipboard() {
    let (desktop, session) = fake_session();
    let dir = tempfile::tempdir().unwrap();
    let csv_path = write_loaded_csv(dir.path());

    let datos = desktop.add_window(None, "ThunderRT6FormDC", "Datos", Rect::new(0, 0, 800, 600));
    let grid = desktop.add_window(Some(datos), "MSFlexGridWndClass", "", Rect::sized(10, 10, 700, 500));
    desktop.configure(grid, |w| {
        w.copy_payload = Some(
            "Fila\tIdentificacion\tNombre\tError\r\n1\t111\tAna\tCedula ya existe\r\n".to_string(),
        )
    });

    let capture = session.capture_errors(&csv_path).unwrap();
    assert_eq!(capture.errors, vec!["Cedula ya existe"]);
}

#[test]
fn test_capture_errors_without_grid_is_structural() {
    let (desktop, session) = fake_session();
    let dir = tempfile::tempdir().unwrap();
    let csv_path = write_loaded_csv(dir.path());
    desktop.add_window(None, "ThunderRT6FormDC", "Datos", Rect::new(0, 0, 800, 600));

    let err = session.capture_errors(&csv_path).unwrap_err();
    assert!(matches!(err, AutomationError::StructuralMismatch(_)));
}

#[test]
fn test_grid_text_parsing() {
    let rows = parse_grid_text("1\t111\tAna\tCedula ya existe\n\n2\t222\tFalla\n");
    assert_eq!(rows.len(), 2);
    assert_eq!(crate::session::extract_errors(&rows), vec!["Cedula ya existe", "Falla"]);
}

/// Clicking the trigger shows the given result for the typed national ID.
fn script_search(desktop: &FakeDesktop, screen: &CaptureScreen, answer: fn(&str) -> SearchAnswer) {
    let (identifier, order_input) = (screen.identifier, screen.order_input);
    desktop.on(Trigger::Click(screen.trigger), move |state| {
        match answer(&state.text_of(identifier)) {
            SearchAnswer::Order(order) => state.set_text(order_input, order),
            SearchAnswer::Dialogs(lines) => {
                state.set_text(order_input, "");
                for line in lines {
                    state.add_dialog("PISCO", &[*line], &["Aceptar"]);
                }
            }
            SearchAnswer::Nothing => {}
        }
    });
}

enum SearchAnswer {
    Order(&'static str),
    Dialogs(&'static [&'static str]),
    Nothing,
}

#[test]
fn test_search_extracts_order_number() {
    let (desktop, session) = fake_session();
    let screen = capture_screen(&desktop);
    // Picking a criterion wipes the input, as the real form does.
    let identifier = screen.identifier;
    desktop.on(Trigger::Selection(screen.criterion), move |state| {
        state.set_text(identifier, "");
    });
    script_search(&desktop, &screen, |id| match id {
        "1032456789" => SearchAnswer::Order("01-2345-67"),
        _ => SearchAnswer::Nothing,
    });

    let outcome = session.search_by_national_id(screen.host, "1032456789").unwrap();

    assert_eq!(outcome, Outcome::Success("01-2345-67".to_string()));
    assert_eq!(desktop.state().window(screen.criterion).and_then(|w| w.selection), Some(1));
}

#[test]
fn test_search_reports_not_found() {
    let (desktop, session) = fake_session();
    let screen = capture_screen(&desktop);
    script_search(&desktop, &screen, |_| {
        SearchAnswer::Dialogs(&["No se encontró registro"])
    });

    let outcome = session.search_by_national_id(screen.host, "999").unwrap();

    assert_eq!(outcome, Outcome::NotFound);
    assert!(session.popups().scan().is_empty());
}

#[test]
fn test_no_match_wins_over_type_mismatch() {
    let (desktop, session) = fake_session();
    let screen = capture_screen(&desktop);
    script_search(&desktop, &screen, |_| {
        SearchAnswer::Dialogs(&["No se encontró registro", "Error '13': No coinciden los tipos"])
    });

    let outcome = session.search_by_national_id(screen.host, "999").unwrap();
    assert_eq!(outcome, Outcome::NotFound);
}

#[test]
fn test_leftover_dialogs_do_not_reach_the_next_record() {
    let (desktop, session) = fake_session();
    let screen = capture_screen(&desktop);
    script_search(&desktop, &screen, |id| match id {
        "111" => SearchAnswer::Order("01-2345-67"),
        _ => SearchAnswer::Dialogs(&[
            "No se encontró registro",
            "Error '13': No coinciden los tipos",
            "Proceso finalizado",
        ]),
    });

    let first = session.search_by_national_id(screen.host, "999").unwrap();
    assert_eq!(first, Outcome::NotFound);
    assert!(session.popups().scan().is_empty());

    let second = session.search_by_national_id(screen.host, "111").unwrap();
    assert_eq!(second, Outcome::Success("01-2345-67".to_string()));
}

#[test]
fn test_type_mismatch_is_a_foreign_error() {
    let (desktop, session) = fake_session();
    let screen = capture_screen(&desktop);
    script_search(&desktop, &screen, |_| {
        SearchAnswer::Dialogs(&["Error '13' en tiempo de ejecución: No coinciden los tipos"])
    });

    let err = session.search_by_national_id(screen.host, "ABC").unwrap_err();

    assert!(matches!(err, AutomationError::ForeignError(_)));
    assert!(err.is_per_record());
    assert!(session.popups().scan().is_empty());
}

#[test]
fn test_search_without_result_times_out() {
    let (desktop, session) = fake_session();
    let screen = capture_screen(&desktop);
    script_search(&desktop, &screen, |_| SearchAnswer::Nothing);

    let outcome = session.search_by_national_id(screen.host, "1032456789").unwrap();
    assert_eq!(outcome, Outcome::Timeout);
}

#[test]
fn test_search_closes_calls_window() {
    let (desktop, session) = fake_session();
    let screen = capture_screen(&desktop);
    let order_input = screen.order_input;
    desktop.on(Trigger::Click(screen.trigger), move |state| {
        state.add_window(
            None,
            "ThunderRT6FormDC",
            "Control de Llamadas / Novedades",
            Rect::new(600, 500, 900, 700),
        );
        state.set_text(order_input, "02-10001-26");
    });

    let outcome = session.search_by_national_id(screen.host, "52111222").unwrap();

    assert_eq!(outcome, Outcome::Success("02-10001-26".to_string()));
    assert!(desktop
        .events()
        .iter()
        .any(|e| matches!(e, FakeEvent::Close(h) if desktop.text_of(*h).starts_with("Control de Llamadas"))));
}

#[test]
fn test_search_on_dead_host_is_structural() {
    let (desktop, session) = fake_session();
    let screen = capture_screen(&desktop);
    desktop.state().destroy(screen.host);

    let err = session.search_by_national_id(screen.host, "1").unwrap_err();
    assert!(matches!(err, AutomationError::StructuralMismatch(_)));
}

#[test]
fn test_terminal_states() {
    assert!(SearchState::NotFoundTerminal.is_terminal());
    assert!(SearchState::ResultExtracted.is_terminal());
    assert!(!SearchState::Submitted.is_terminal());
}

#[test]
fn test_teardown_runs_every_step() {
    let ran = Cell::new(0);
    let failed = Teardown::new()
        .step("first", || Err(AutomationError::Timeout("stuck".to_string())))
        .step("second", || {
            ran.set(ran.get() + 1);
            Ok(())
        })
        .step("third", || {
            ran.set(ran.get() + 1);
            Err(AutomationError::PlatformError("gone".to_string()))
        })
        .run();

    assert_eq!(failed, vec!["first", "third"]);
    assert_eq!(ran.get(), 2);
}

#[test]
fn test_session_teardown_closes_and_kills() {
    let (desktop, session) = fake_session();
    let main = desktop.add_window(None, "ThunderRT6MDIForm", "PISCO - Principal", Rect::new(0, 0, 1024, 768));
    let migration = migration_window(&desktop);
    desktop.add_dialog("PISCO", &["Aviso"], &["Aceptar"]);

    let failed = session.teardown(&app_config(), Some(migration.window), Some(main));

    assert!(failed.is_empty());
    assert!(!desktop.is_alive(main));
    assert!(!desktop.is_alive(migration.window));
    assert!(session.popups().scan().is_empty());
    assert!(desktop.events().contains(&FakeEvent::Kill("pisco.exe".to_string())));
}
