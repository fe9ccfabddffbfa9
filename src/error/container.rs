//! Schema problems are reported all at once, each attributed to the label
//! declaration that it was found in.

use std::fmt;

use thiserror::Error;

use crate::error::schema;

/// A schema error together with the declaration in which it was found.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub struct DeclarationError {
    /// The position of the declaration among the declarations of the schema.
    pub declaration: u32,

    /// The name of the declared label, when the declaration got far enough to
    /// have one.
    pub label: Option<String>,

    pub error: schema::Error,
}

impl DeclarationError {
    /// Attributes `error` to the declaration at index `declaration`.
    #[must_use]
    pub fn new(declaration: u32, error: schema::Error) -> Self {
        Self {
            declaration,
            label: None,
            error,
        }
    }

    /// Names the label that the declaration declares.
    #[must_use]
    pub fn of_label(self, name: impl Into<String>) -> Self {
        Self {
            label: Some(name.into()),
            ..self
        }
    }
}

impl fmt::Display for DeclarationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.label {
            Some(label) => write!(f, "In {label} (declaration #{}): ", self.declaration)?,
            None => write!(f, "In declaration #{}: ", self.declaration)?,
        }
        write!(f, "{}", self.error)
    }
}

/// Every problem found while building a schema, in declaration order.
///
/// Problems within one declaration keep the order they were found in.
#[derive(Clone, Debug, Default, Eq, Error, PartialEq)]
pub struct Errors {
    errors: Vec<DeclarationError>,
}

impl Errors {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `error`, placing it after any problem already found in the
    /// same or an earlier declaration.
    pub fn add(&mut self, error: DeclarationError) {
        let at = self.errors.partition_point(|e| e.declaration <= error.declaration);
        self.errors.insert(at, error);
    }

    /// Records `error` against the declaration of the label `name` at index
    /// `declaration`.
    pub fn add_for(&mut self, declaration: u32, name: &str, error: schema::Error) {
        self.add(DeclarationError::new(declaration, error).of_label(name));
    }

    #[must_use]
    pub fn as_slice(&self) -> &[DeclarationError] {
        &self.errors
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Gets the names of the labels whose declarations have problems, each
    /// once and in declaration order.
    #[must_use]
    pub fn labels(&self) -> Vec<&str> {
        let mut labels: Vec<&str> = Vec::new();
        for label in self.errors.iter().filter_map(|e| e.label.as_deref()) {
            if !labels.contains(&label) {
                labels.push(label);
            }
        }
        labels
    }
}

impl From<DeclarationError> for Errors {
    fn from(error: DeclarationError) -> Self {
        Self {
            errors: vec![error],
        }
    }
}

impl From<Errors> for Vec<DeclarationError> {
    fn from(errors: Errors) -> Self {
        errors.errors
    }
}

impl fmt::Display for Errors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errors.as_slice() {
            [] => write!(f, "The schema has no problems"),
            [error] => write!(f, "{error}"),
            errors => {
                write!(f, "The schema has {} problems", errors.len())?;
                for error in errors {
                    write!(f, "\n  {error}")?;
                }
                Ok(())
            }
        }
    }
}
