//! Fingerprint verification page: binds the state machine to widgets,
//! timers, and the sensor session.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::mpsc::{self, TryRecvError};
use std::sync::Arc;

use gtk4::glib::{self, SourceId};
use gtk4::prelude::*;
use gtk4::{Align, Box as GtkBox, Button, Image, Label, Orientation, Stack};
use log::info;
use tokio::runtime::Runtime;

use crate::core::config;
use crate::core::sensor::{SensorEvent, SensorSession};
use crate::core::verify::{
    Action, Display, Outcome, VerifyMachine, VerifyRequest, INITIALIZING_TEXT, SCAN_HINT_TEXT,
    SUCCESS_TEXT,
};

const ICON_SCANNING: &str = "fingerprint-symbolic";
const ICON_ERROR: &str = "dialog-error-symbolic";
const ICON_SUCCESS: &str = "emblem-ok-symbolic";

const PAGE_NAME: &str = "verify";

struct VerifyPage {
    stack: Stack,
    root: GtkBox,
    icon: Image,
    status: Label,
    session: SensorSession,
    machine: RefCell<VerifyMachine>,
    error_reset: RefCell<Option<SourceId>>,
    close_delay: RefCell<Option<SourceId>>,
    on_result: Box<dyn Fn(Outcome)>,
    reported: Cell<bool>,
}

/// Build the verification page, add it to `stack`, and navigate to it.
/// `on_result` receives the single terminal outcome of the flow.
pub fn launch(
    stack: &Stack,
    rt: Arc<Runtime>,
    request: VerifyRequest,
    on_result: impl Fn(Outcome) + 'static,
) {
    info!(
        "Launching fingerprint verification for key '{}'",
        request.key()
    );

    let (tx, rx) = mpsc::channel::<SensorEvent>();
    let session = SensorSession::new(rt, request.key().to_string(), tx);

    let root = GtkBox::new(Orientation::Vertical, 16);
    root.set_margin_top(24);
    root.set_margin_bottom(24);
    root.set_margin_start(24);
    root.set_margin_end(24);
    root.set_valign(Align::Center);

    let heading = Label::new(Some("Confirm your fingerprint"));
    heading.add_css_class("title-2");

    let icon = Image::from_icon_name(ICON_SCANNING);
    icon.set_pixel_size(96);

    let status = Label::new(None);
    status.set_wrap(true);

    let cancel_btn = Button::with_label("Cancel");
    cancel_btn.set_halign(Align::Center);

    root.append(&heading);
    root.append(&icon);
    root.append(&status);
    root.append(&cancel_btn);

    // Replace any page left over from a previous flow
    if let Some(old) = stack.child_by_name(PAGE_NAME) {
        stack.remove(&old);
    }
    stack.add_named(&root, Some(PAGE_NAME));

    let page = Rc::new(VerifyPage {
        stack: stack.clone(),
        root: root.clone(),
        icon,
        status,
        session,
        machine: RefCell::new(VerifyMachine::new(request)),
        error_reset: RefCell::new(None),
        close_delay: RefCell::new(None),
        on_result: Box::new(on_result),
        reported: Cell::new(false),
    });

    show(&page, &Display::Initializing);

    // Sensor registration follows page visibility: register on map,
    // unregister on unmap (one cycle per focus change).
    {
        let page = page.clone();
        root.connect_map(move |_| {
            info!("Verification page mapped - registering sensor session");
            page.session.register();
        });
    }
    {
        let page = page.clone();
        root.connect_unmap(move |_| {
            info!("Verification page unmapped - unregistering sensor session");
            page.session.unregister();
        });
    }

    {
        let page = page.clone();
        cancel_btn.connect_clicked(move |_| {
            info!("User cancelled verification");
            let actions = page.machine.borrow_mut().cancel();
            dispatch(&page, actions);
        });
    }

    // Drain sensor events on the main loop; they are produced on the
    // tokio runtime.
    {
        let page = page.clone();
        glib::idle_add_local(move || {
            loop {
                match rx.try_recv() {
                    Ok(event) => handle_event(&page, event),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => return glib::ControlFlow::Break,
                }
            }
            if page.machine.borrow().is_finished() {
                glib::ControlFlow::Break
            } else {
                glib::ControlFlow::Continue
            }
        });
    }

    stack.set_visible_child_name(PAGE_NAME);
}

fn handle_event(page: &Rc<VerifyPage>, event: SensorEvent) {
    let actions = page.machine.borrow_mut().handle(event);
    dispatch(page, actions);
}

/// Execute machine actions in order.
fn dispatch(page: &Rc<VerifyPage>, actions: Vec<Action>) {
    for action in actions {
        match action {
            Action::Show(display) => show(page, &display),
            Action::StartSensor => page.session.start(),
            Action::CancelErrorReset => cancel_error_reset(page),
            Action::ScheduleErrorReset(delay) => {
                cancel_error_reset(page);
                let timer_page = page.clone();
                let id = glib::timeout_add_local_once(delay, move || {
                    timer_page.error_reset.borrow_mut().take();
                    let actions = timer_page.machine.borrow_mut().on_error_reset();
                    dispatch(&timer_page, actions);
                });
                *page.error_reset.borrow_mut() = Some(id);
            }
            Action::ScheduleClose(delay) => {
                let timer_page = page.clone();
                let id = glib::timeout_add_local_once(delay, move || {
                    timer_page.close_delay.borrow_mut().take();
                    let actions = timer_page.machine.borrow_mut().on_close_delay();
                    dispatch(&timer_page, actions);
                });
                *page.close_delay.borrow_mut() = Some(id);
            }
            Action::Finish(outcome) => finish(page, outcome),
        }
    }
}

fn show(page: &VerifyPage, display: &Display) {
    let colors = config::colors();
    match display {
        Display::Initializing => {
            page.icon.set_icon_name(Some(ICON_SCANNING));
            set_status(page, colors.hint, INITIALIZING_TEXT);
        }
        Display::ScanHint => {
            page.icon.set_icon_name(Some(ICON_SCANNING));
            set_status(page, colors.hint, SCAN_HINT_TEXT);
        }
        Display::Error(message) => {
            page.icon.set_icon_name(Some(ICON_ERROR));
            set_status(page, colors.warning, message);
        }
        Display::Success => {
            page.icon.set_icon_name(Some(ICON_SUCCESS));
            set_status(page, colors.success, SUCCESS_TEXT);
        }
    }
}

fn set_status(page: &VerifyPage, color: &str, text: &str) {
    page.status.set_markup(&format!(
        "<span foreground='{}'>{}</span>",
        color,
        glib::markup_escape_text(text)
    ));
}

fn cancel_error_reset(page: &VerifyPage) {
    if let Some(id) = page.error_reset.borrow_mut().take() {
        id.remove();
    }
}

fn cancel_timers(page: &VerifyPage) {
    cancel_error_reset(page);
    if let Some(id) = page.close_delay.borrow_mut().take() {
        id.remove();
    }
}

/// Report the outcome once and navigate back to the caller page.
fn finish(page: &Rc<VerifyPage>, outcome: Outcome) {
    if page.reported.get() {
        return;
    }
    page.reported.set(true);

    cancel_timers(page);
    info!(
        "Verification flow for key '{}' finished: {:?}",
        page.machine.borrow().key(),
        outcome
    );

    (page.on_result)(outcome);

    // Navigating away unmaps the page, which unregisters the session.
    page.stack.set_visible_child_name("main");
    page.stack.remove(&page.root);
}
