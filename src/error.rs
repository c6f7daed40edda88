use std::fmt;

#[derive(Debug)]
pub enum FormError {
    UnsupportedKind(String),
    SchemaLoad(String),
    TemplateParse(String),
    TemplateEncrypted,
    OutputWrite(String),
    Io(std::io::Error),
}

impl fmt::Display for FormError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormError::UnsupportedKind(tag) => {
                write!(f, "unsupported document kind: {}", tag)
            }
            FormError::SchemaLoad(message) => write!(f, "schema load error: {}", message),
            FormError::TemplateParse(message) => {
                write!(f, "template parse error: {}", message)
            }
            FormError::TemplateEncrypted => write!(f, "template PDF is encrypted"),
            FormError::OutputWrite(message) => write!(f, "output write error: {}", message),
            FormError::Io(err) => write!(f, "io error: {}", err),
        }
    }
}

impl std::error::Error for FormError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FormError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for FormError {
    fn from(value: std::io::Error) -> Self {
        FormError::Io(value)
    }
}
