//! The operator control surface.
//!
//! The desktop window (token list, PIN entry, progress display) is an
//! external collaborator; [`Operator`] is its seam. The console
//! implementation below stands in for it: it talks to the operator on
//! stderr and reads the PIN from the controlling terminal. stdin and
//! stdout belong to the native-messaging stream and are never touched.

use {
    signbridge_sdk::{
        engine::ProgressObserver,
        protocol::wire::SignRequest,
        token::manager::{is_signing_label, SlotRef},
    },
    std::io::Write as _,
};

pub struct Authorization {
    pub slot: SlotRef,
    pub pin: String,
}

pub enum AuthOutcome {
    Approved(Authorization),
    /// No signing-capable token present.
    NoToken,
    /// The operator declined or dismissed the request.
    Declined,
}

/// Decisions the host needs from the operator. Implementations must
/// not read stdin or write stdout.
pub trait Operator: ProgressObserver + Send + Sync {
    fn authorize(
        &self,
        request: &SignRequest,
        object_count: usize,
        slots: &[SlotRef],
    ) -> anyhow::Result<AuthOutcome>;
}

/// Terminal stand-in for the desktop window: picks the first
/// signing-capable token and prompts for its PIN on the TTY.
pub struct ConsoleOperator;

impl Operator for ConsoleOperator {
    fn authorize(
        &self,
        request: &SignRequest,
        object_count: usize,
        slots: &[SlotRef],
    ) -> anyhow::Result<AuthOutcome> {
        let signing: Vec<&SlotRef> = slots
            .iter()
            .filter(|s| is_signing_label(&s.token_label))
            .collect();

        let Some(slot) = signing.first() else {
            eprintln!("signbridge: no signing-capable token present");
            return Ok(AuthOutcome::NoToken);
        };

        eprintln!(
            "signbridge: signing request from {} ({object_count} object(s), certId {})",
            request.app_id, request.cert.cert_id
        );
        for candidate in &signing {
            eprintln!("signbridge:   token: {candidate}");
        }
        std::io::stderr().flush().ok();

        let pin = rpassword::prompt_password(format!("Enter PIN for {slot} (empty cancels): "))?;
        if pin.trim().is_empty() {
            return Ok(AuthOutcome::Declined);
        }

        Ok(AuthOutcome::Approved(Authorization {
            slot: (*slot).clone(),
            pin: pin.trim().to_string(),
        }))
    }
}

impl ProgressObserver for ConsoleOperator {
    fn object_progress(&self, object_id: &str, percent: u8, message: &str) {
        if object_id.is_empty() {
            eprintln!("signbridge: {message}");
        } else {
            eprintln!("signbridge: [{percent:3}%] {message}");
        }
    }
}
