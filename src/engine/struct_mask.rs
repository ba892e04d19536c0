//! Struct masking: apply named mask policies to tagged fields of composite
//! values.
//!
//! Types opt in by implementing [`MaskTagged`] and routing each maskable
//! field through the [`FieldVisitor`]. Recursion into nested composites is
//! depth-limited to [`MAX_CALL_DEPTH`] levels (root included); at the limit
//! the nested value is left unchanged, which also terminates cyclic shapes
//! reached through interior mutability.
//!
//! Unknown mask names and worker failures skip the field silently; only
//! the field-count cap and internal panics surface as errors.
//!
//! ```no_run
//! use dataveil::{Engine, FieldVisitor, MaskTagged};
//!
//! struct Contact {
//!     email: String,
//!     backup: Option<Box<Contact>>,
//! }
//!
//! impl MaskTagged for Contact {
//!     fn mask_fields(&mut self, v: &mut FieldVisitor<'_>) {
//!         v.string("EMAIL", &mut self.email);
//!         v.nested(&mut self.backup);
//!     }
//! }
//!
//! # let mut engine = Engine::new();
//! # engine.apply_config_default()?;
//! let mut contact = Contact { email: "abcd@abcd.com".into(), backup: None };
//! engine.mask_struct(&mut contact)?;
//! # Ok::<(), dataveil::DlpError>(())
//! ```

use std::panic::{self, AssertUnwindSafe};

use crate::api::{MAX_CALL_DEPTH, MAX_INPUT};
use crate::engine::Engine;
use crate::errors::DlpError;

/// A composite whose fields carry mask policies.
pub trait MaskTagged {
    /// Routes every maskable field through the visitor.
    fn mask_fields(&mut self, visitor: &mut FieldVisitor<'_>);
}

impl<T: MaskTagged> MaskTagged for Option<T> {
    fn mask_fields(&mut self, visitor: &mut FieldVisitor<'_>) {
        if let Some(inner) = self {
            inner.mask_fields(visitor);
        }
    }
}

impl<T: MaskTagged> MaskTagged for Box<T> {
    fn mask_fields(&mut self, visitor: &mut FieldVisitor<'_>) {
        (**self).mask_fields(visitor);
    }
}

impl<T: MaskTagged> MaskTagged for Vec<T> {
    fn mask_fields(&mut self, visitor: &mut FieldVisitor<'_>) {
        for item in self {
            item.mask_fields(visitor);
        }
    }
}

/// Applies mask workers to the fields a [`MaskTagged`] type reports.
pub struct FieldVisitor<'e> {
    engine: &'e Engine,
    /// Remaining nesting hops below the current level.
    depth: usize,
    fields: usize,
    failure: Option<DlpError>,
}

impl<'e> FieldVisitor<'e> {
    fn new(engine: &'e Engine) -> Self {
        Self {
            engine,
            depth: MAX_CALL_DEPTH - 1,
            fields: 0,
            failure: None,
        }
    }

    /// Masks one string field in place. Unknown workers and worker errors
    /// leave the field untouched.
    pub fn string(&mut self, mask_name: &str, value: &mut String) {
        if !self.tally() || mask_name.is_empty() {
            return;
        }
        if let Some(worker) = self.engine.masker(mask_name) {
            if let Ok(masked) = worker.mask(value, self.engine) {
                *value = masked;
            }
        }
    }

    /// Masks a sequence of strings elementwise under one policy.
    pub fn strings(&mut self, mask_name: &str, values: &mut [String]) {
        if !self.tally() || mask_name.is_empty() {
            return;
        }
        let Some(worker) = self.engine.masker(mask_name) else {
            return;
        };
        for value in values {
            if let Ok(masked) = worker.mask(value, self.engine) {
                *value = masked;
            }
        }
    }

    /// Recurses into a nested composite, consuming one depth level. At
    /// depth zero the child is left unchanged.
    pub fn nested<T: MaskTagged + ?Sized>(&mut self, child: &mut T) {
        if !self.tally() {
            return;
        }
        if self.depth == 0 {
            return;
        }
        self.depth -= 1;
        child.mask_fields(self);
        self.depth += 1;
    }

    fn tally(&mut self) -> bool {
        if self.failure.is_some() {
            return false;
        }
        self.fields += 1;
        if self.fields > MAX_INPUT {
            self.failure = Some(DlpError::MaxInputLimit {
                len: self.fields,
                limit: MAX_INPUT,
            });
            return false;
        }
        true
    }
}

impl Engine {
    /// Masks a composite value in place according to its field tags.
    pub fn mask_struct<T: MaskTagged>(&self, value: &mut T) -> Result<(), DlpError> {
        self.ensure_ready()?;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let mut visitor = FieldVisitor::new(self);
            value.mask_fields(&mut visitor);
            visitor.failure
        }));
        match outcome {
            Ok(None) => Ok(()),
            Ok(Some(err)) => Err(err),
            Err(_) => {
                tracing::error!("panic during struct traversal");
                Err(DlpError::MaskStructOutput)
            }
        }
    }
}
