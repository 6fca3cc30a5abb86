//! Routes a request payload to its command handler.
//!
//! Routes are matched by literal prefix, longest literal first, so a literal
//! that is a prefix of another can never shadow it. Handlers run behind a
//! panic guard: whatever happens inside one, the caller gets a single
//! response line back.

use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    path::PathBuf,
    sync::Arc,
};

use tracing::{debug, error, instrument};

use crate::config::ServerConfig;
use crate::registry::Registries;
use crate::server::handler;
use crate::server::health::HealthMetrics;
use crate::utils::{CommandError, ServerError};

/// Everything a handler may touch.
pub struct Services {
    pub registries: Registries,
    pub max_sequence_length: usize,
    pub reports_dir: PathBuf,
    pub metrics: HealthMetrics,
}

impl Services {
    pub fn new(registries: Registries, config: &ServerConfig, metrics: HealthMetrics) -> Self {
        Self {
            registries,
            max_sequence_length: config.max_sequence_length,
            reports_dir: config.reports_dir.clone(),
            metrics,
        }
    }
}

pub type Handler = fn(&Services, &str) -> Result<String, CommandError>;

/// A registered command literal.
#[derive(Clone, Copy)]
pub struct Route {
    pub prefix: &'static str,
    /// Prefix of error responses produced by this command.
    pub error_tag: &'static str,
    pub handler: Handler,
}

impl Route {
    pub fn new(prefix: &'static str, error_tag: &'static str, handler: Handler) -> Self {
        Self {
            prefix,
            error_tag,
            handler,
        }
    }

    /// A literal ending in `:` matches any message it starts. A bare literal
    /// such as `LISTAR_PACIENTES` must end the message or be followed by a
    /// separator or whitespace, so `LISTAR_PACIENTESX` is not taken for it.
    fn matches(&self, message: &str) -> bool {
        let Some(rest) = message.strip_prefix(self.prefix) else {
            return false;
        };
        if self.prefix.ends_with(':') {
            return true;
        }
        match rest.chars().next() {
            None | Some(':' | '|') => true,
            Some(c) => c.is_whitespace(),
        }
    }
}

/// A request split into its keyword and the rest of the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command<'a> {
    pub keyword: &'static str,
    pub raw_args: &'a str,
}

/// The command surface served to clients.
pub fn default_routes() -> Vec<Route> {
    vec![
        Route::new("REGISTRAR_PACIENTE:", "ERROR", handler::register_patient),
        Route::new("CONSULTAR_PACIENTE:", "ERROR", handler::consult_patient),
        Route::new("LISTAR_PACIENTES", "ERROR", handler::list_patients),
        Route::new("CARGAR_VIRUS", "ERROR_FASTA", handler::load_viruses),
        Route::new("REGISTRAR_VIRUS:", "ERROR_FASTA", handler::register_virus),
        Route::new("ENVIAR_MUESTRA:", "ERROR_MUESTRA", handler::submit_sample),
        Route::new("DIAGNOSTICAR", "ERROR_DIAGNOSTICO", handler::submit_sample),
        Route::new("CONSULTAR_DIAGNOSTICOS:", "ERROR", handler::consult_diagnoses),
        Route::new("REPORTE_ALTO_RIESGO", "ERROR_IO", handler::high_risk_report),
        Route::new("REPORTE_MUTACIONES:", "ERROR_MUESTRA", handler::mutation_report),
    ]
}

pub struct Dispatcher {
    routes: Vec<Route>,
    services: Arc<Services>,
}

impl Dispatcher {
    /// Builds a dispatcher serving [`default_routes`].
    pub fn new(services: Arc<Services>) -> Result<Self, ServerError> {
        Self::with_routes(services, default_routes())
    }

    /// Builds a dispatcher over an explicit route table.
    ///
    /// # Errors
    /// Returns a `ServerError::ConfigurationError` when a literal is registered twice.
    pub fn with_routes(services: Arc<Services>, mut routes: Vec<Route>) -> Result<Self, ServerError> {
        routes.sort_by(|a, b| {
            b.prefix
                .len()
                .cmp(&a.prefix.len())
                .then_with(|| a.prefix.cmp(b.prefix))
        });
        for pair in routes.windows(2) {
            if pair[0].prefix == pair[1].prefix {
                return Err(ServerError::ConfigurationError(format!(
                    "Command {} registered twice",
                    pair[0].prefix
                )));
            }
        }
        Ok(Self { routes, services })
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    fn route_for(&self, message: &str) -> Option<&Route> {
        self.routes.iter().find(|r| r.matches(message))
    }

    /// Splits `message` into its command, if any literal matches.
    pub fn parse<'a>(&self, message: &'a str) -> Option<Command<'a>> {
        self.route_for(message).map(|route| Command {
            keyword: route.prefix,
            raw_args: &message[route.prefix.len()..],
        })
    }

    /// Runs the command carried by `message` and returns the response line.
    ///
    /// Never fails: unknown commands, handler errors and handler panics are
    /// all turned into `ERROR...` responses.
    #[instrument(skip_all, fields(len = message.len()))]
    pub fn dispatch(&self, message: &str) -> String {
        let message = message.trim_end_matches(&['\r', '\n'][..]);
        let Some(route) = self.route_for(message) else {
            debug!("Unknown command");
            return CommandError::UnknownCommand.render("ERROR");
        };

        let raw_args = &message[route.prefix.len()..];
        debug!(command = route.prefix, "Dispatching");
        let outcome = catch_unwind(AssertUnwindSafe(|| (route.handler)(self.services.as_ref(), raw_args)));
        match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                debug!(command = route.prefix, error = %err, "Command failed");
                err.render(route.error_tag)
            }
            Err(_) => {
                error!(command = route.prefix, "Command handler panicked");
                CommandError::Internal.render(route.error_tag)
            }
        }
    }
}
