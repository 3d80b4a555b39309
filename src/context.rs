use crate::config::ConnectionConfig;
use crate::schema::{DotBase64Encoder, Schema, TypeNameEncoder};

/// Read-only collaborators shared by every compiler for the lifetime of a request.
#[derive(Clone, Copy)]
pub struct CompileContext<'a> {
    pub schema: &'a Schema,
    pub config: &'a ConnectionConfig,
    pub encoder: &'a dyn TypeNameEncoder,
}

static DEFAULT_ENCODER: DotBase64Encoder = DotBase64Encoder;

impl<'a> CompileContext<'a> {
    pub fn new(schema: &'a Schema, config: &'a ConnectionConfig) -> Self {
        Self {
            schema,
            config,
            encoder: &DEFAULT_ENCODER,
        }
    }

    pub fn with_encoder(self, encoder: &'a dyn TypeNameEncoder) -> Self {
        Self { encoder, ..self }
    }
}
