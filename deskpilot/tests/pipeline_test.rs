use deskpilot::artifacts::CsvTable;
use deskpilot::config::RobotConfig;
use deskpilot::platforms::fake::{FakeDesktop, FakeEvent, FakeState, Trigger};
use deskpilot::platforms::Key;
use deskpilot::session::LoadReport;
use deskpilot::{MemoryStore, Rect, Session, Timings, WindowHandle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const ORDER: &str = "01-2345-67";
const REGISTERED_ID: &str = "111";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("deskpilot=debug"))
        .with_test_writer()
        .try_init();
}

fn now() -> chrono::NaiveDateTime {
    chrono::NaiveDate::from_ymd_opt(2026, 10, 16)
        .and_then(|d| d.and_hms_opt(7, 45, 0))
        .expect("valid timestamp")
}

fn config(base_dir: &Path) -> RobotConfig {
    let mut config = RobotConfig::default();
    config.app.exe_path = PathBuf::from("C:/PISCO/pisco.exe");
    config.app.login_title_re = "(?i)inicio de sesi".to_string();
    config.app.main_title_re = "^PISCO - Principal".to_string();
    config.app.main_load_timeout_secs = 0;
    config.login.user = "operador".to_string();
    config.login.password = "secreto".to_string();
    config.paths.base_dir = base_dir.to_path_buf();
    config.timings = Timings::immediate();
    config
}

fn hidden(state: &mut FakeState, handle: WindowHandle) -> WindowHandle {
    if let Some(window) = state.window_mut(handle) {
        window.visible = false;
    }
    handle
}

fn show(state: &mut FakeState, handle: WindowHandle) {
    if let Some(window) = state.window_mut(handle) {
        window.visible = true;
    }
}

fn showing(state: &FakeState, handle: WindowHandle) -> bool {
    state.window(handle).is_some_and(|w| w.alive && w.visible)
}

/// Scripts the whole application: login, main window with the capture
/// screen, migration window with its dialogs, and a search that only knows
/// one national ID.
fn scripted_application(desktop: &FakeDesktop) {
    let mut state = desktop.state();

    let login = state.add_window(None, "ThunderRT6FormDC", "Inicio de sesión - PISCO", Rect::sized(350, 250, 320, 200));
    state.add_window(Some(login), "Edit", "", Rect::sized(450, 290, 150, 22));
    state.add_window(Some(login), "Edit", "", Rect::sized(450, 330, 150, 22));
    hidden(&mut state, login);

    let main = state.add_window(None, "ThunderRT6MDIForm", "PISCO - Principal", Rect::new(0, 0, 1024, 768));
    let identifier = state.add_window(Some(main), "Edit", "", Rect::sized(20, 60, 160, 22));
    let criterion = state.add_window(Some(main), "ThunderRT6ComboBox", "Nombre", Rect::sized(200, 60, 180, 22));
    if let Some(combo) = state.window_mut(criterion) {
        combo.combo_items = Some(2);
        combo.selection = Some(0);
    }
    let trigger = state.add_window(Some(main), "ThunderRT6PictureBox", "", Rect::sized(394, 60, 22, 22));
    state.add_window(Some(main), "Static", "No Orden Servicio", Rect::sized(20, 400, 120, 18));
    let order_input = state.add_window(Some(main), "Edit", "", Rect::sized(150, 400, 120, 22));
    hidden(&mut state, main);

    let migration = state.add_window(None, "ThunderRT6FormDC", "Migración Servicios desde Excel", Rect::sized(100, 100, 600, 400));
    let load_button = state.add_window(Some(migration), "ThunderRT6CommandButton", "Cargar Archivo", Rect::sized(120, 440, 110, 26));
    let save_button = state.add_window(Some(migration), "ThunderRT6CommandButton", "Guardar Masivo", Rect::sized(250, 440, 110, 26));
    hidden(&mut state, migration);

    let file_dialog = state.add_dialog("Abrir", &[], &["Abrir", "Cancelar"]);
    hidden(&mut state, file_dialog);
    let load_result = state.add_dialog(
        "PISCO",
        &["Archivo procesado", "Registros cargados: 4", "Registros inválidos: 0"],
        &["Aceptar"],
    );
    hidden(&mut state, load_result);
    let confirmation = state.add_dialog("Confirmación", &["¿Desea guardar los registros?"], &["Sí", "No"]);
    hidden(&mut state, confirmation);
    let buttons = state
        .window(confirmation)
        .map(|w| w.children.clone())
        .unwrap_or_default();
    let yes = buttons
        .into_iter()
        .find(|h| state.text_of(*h) == "Sí")
        .expect("confirmation has a yes button");
    let save_done = state.add_dialog("PISCO", &["Proceso finalizado"], &["Aceptar"]);
    hidden(&mut state, save_done);
    let month_prompt = state.add_dialog("PISCO", &["Mes a Visualizar Servicios"], &["Aceptar", "Cancelar"]);
    hidden(&mut state, month_prompt);
    drop(state);

    desktop.on(Trigger::Launch, move |s| show(s, login));
    desktop.on(Trigger::Key(Key::Enter), move |s| {
        if showing(s, login) {
            s.destroy(login);
            show(s, main);
        }
    });
    desktop.on(
        Trigger::Menu("Operaciones->Migracion Servicios desde Excel".to_string()),
        move |s| show(s, migration),
    );
    desktop.on(Trigger::Click(load_button), move |s| show(s, file_dialog));
    desktop.on(Trigger::Key(Key::Enter), move |s| {
        if showing(s, file_dialog) {
            s.destroy(file_dialog);
            show(s, load_result);
        }
    });
    desktop.on(Trigger::Click(save_button), move |s| show(s, confirmation));
    desktop.on(Trigger::Click(yes), move |s| show(s, save_done));
    desktop.on(
        Trigger::Menu("Archivo->Capturar Servicios".to_string()),
        move |s| show(s, month_prompt),
    );
    // Changing the criterion wipes the search input.
    desktop.on(Trigger::Selection(criterion), move |s| s.set_text(identifier, ""));
    desktop.on(Trigger::Click(trigger), move |s| {
        if s.text_of(identifier) == REGISTERED_ID {
            s.set_text(order_input, ORDER);
        } else {
            s.set_text(order_input, "");
            s.add_dialog("PISCO", &["No se encontró registro"], &["Aceptar"]);
        }
    });
}

fn pending_store() -> MemoryStore {
    MemoryStore::from_str_rows(&[
        &["Fecha", "Nombre", "N° Prestacion", "CC: Del Fallecido", "TIPO"],
        &["2026-10-15", "Ana", "Pendiente", "111", "Humano"],
        &["2026-10-15", "Luis", "pendiente", "", "Humano"],
        &["2026-10-15", "Rex", "Pendiente", "", "Mascota"],
        &["2026-10-15", "Eva", "Hecho", "333", "Humano"],
        &["2026-10-15", "Ana", "Pendiente", "111", "Humano"],
        &["2026-10-16", "Juan", "Pendiente", "444", "Humano"],
    ])
}

#[test]
fn test_full_run_reconciles_every_row() {
    init_tracing();
    let dir = tempfile::tempdir().expect("tempdir");
    let desktop = Arc::new(FakeDesktop::new());
    scripted_application(&desktop);
    let session = Session::new(desktop.clone(), Timings::immediate(), CancellationToken::new());
    let mut store = pending_store();

    let report = deskpilot::pipeline::run_at(&config(dir.path()), &session, &mut store, now())
        .expect("run succeeds");

    assert_eq!(report.exported, 5);
    let prevalidation = report.prevalidation.as_ref().expect("pre-validation ran");
    assert_eq!((prevalidation.kept, prevalidation.dropped), (4, 1));
    assert_eq!(report.load, Some(LoadReport { loaded: 4, invalid: 0 }));
    assert_eq!(report.save, Some("success"));
    assert_eq!(report.errors_csv_path, None);
    assert_eq!(report.search.searched, 4);
    assert_eq!(report.search.found, 2);
    assert_eq!(report.search.not_found, 2);
    assert_eq!(report.search.unmapped, 0);
    assert_eq!(report.flushed.cells, 4);
    assert!(report.teardown_failures.is_empty());

    assert_eq!(store.cell(2, 3), ORDER);
    assert_eq!(store.cell(3, 3), "Falta CC fallecido");
    assert_eq!(store.cell(4, 3), "Cedula no registrada");
    assert_eq!(store.cell(5, 3), "Hecho");
    assert_eq!(store.cell(6, 3), ORDER);
    assert_eq!(store.cell(7, 3), "Cedula no registrada");

    let csv_path = report.csv_path.expect("csv exported");
    assert!(csv_path.starts_with(dir.path().join("servicios").join("2026-10-16")));
    let table = CsvTable::read(&csv_path).expect("csv readable");
    let marks: Vec<&str> = table.rows.iter().map(|r| r[2].as_str()).collect();
    assert_eq!(marks, vec![ORDER, "Cedula no registrada", ORDER, "Cedula no registrada"]);

    let events = desktop.events();
    assert!(events.contains(&FakeEvent::Launch(PathBuf::from("C:/PISCO/pisco.exe"), false)));
    assert!(events.contains(&FakeEvent::Kill("pisco.exe".to_string())));
    assert!(desktop.state().live_top_level("#32770").is_empty());
}

#[test]
fn test_nothing_pending_never_launches() {
    init_tracing();
    let dir = tempfile::tempdir().expect("tempdir");
    let desktop = Arc::new(FakeDesktop::new());
    let session = Session::new(desktop.clone(), Timings::immediate(), CancellationToken::new());
    let mut store = MemoryStore::from_str_rows(&[
        &["Nombre", "N° Prestacion", "CC Fallecido"],
        &["Eva", "Hecho", "333"],
    ]);

    let report = deskpilot::pipeline::run_at(&config(dir.path()), &session, &mut store, now())
        .expect("run succeeds");

    assert_eq!(report.exported, 0);
    assert!(report.csv_path.is_none());
    assert!(desktop.events().is_empty());
}

#[test]
fn test_all_rows_rejected_before_loading() {
    init_tracing();
    let dir = tempfile::tempdir().expect("tempdir");
    let desktop = Arc::new(FakeDesktop::new());
    let session = Session::new(desktop.clone(), Timings::immediate(), CancellationToken::new());
    let mut store = MemoryStore::from_str_rows(&[
        &["Nombre", "N° Prestacion", "CC Fallecido"],
        &["Luis", "Pendiente", ""],
        &["Eva", "Hecho", "333"],
        &["Marta", "pendiente", " "],
    ]);

    let report = deskpilot::pipeline::run_at(&config(dir.path()), &session, &mut store, now())
        .expect("run succeeds");

    assert_eq!(report.exported, 2);
    let prevalidation = report.prevalidation.expect("pre-validation ran");
    assert_eq!((prevalidation.kept, prevalidation.dropped), (0, 2));
    assert_eq!(store.cell(2, 2), "Falta CC fallecido");
    assert_eq!(store.cell(3, 2), "Hecho");
    assert_eq!(store.cell(4, 2), "Falta CC fallecido");
    assert!(report.load.is_none());
    assert!(!desktop
        .events()
        .iter()
        .any(|e| matches!(e, FakeEvent::Launch(..))));
}
