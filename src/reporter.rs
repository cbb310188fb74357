use crate::errors::AssemblyError;

pub const DEFAULT_ERROR_LIMIT: usize = 100;

// Accumulates errors during a phase and surfaces them together at the
// phase boundary. Errors past the limit are counted, not stored.
#[derive(Debug)]
pub struct ErrorReporter {
    errors: Vec<AssemblyError>,
    limit: usize,
    elided: usize,
}

impl Default for ErrorReporter {
    fn default() -> Self {
        Self::new(DEFAULT_ERROR_LIMIT)
    }
}

impl ErrorReporter {
    pub fn new(limit: usize) -> Self {
        Self {
            errors: Vec::new(),
            limit: limit.max(1),
            elided: 0,
        }
    }

    pub fn record(&mut self, error: AssemblyError) {
        if self.errors.len() < self.limit {
            self.errors.push(error);
        } else {
            self.elided += 1;
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn count(&self) -> usize {
        self.errors.len() + self.elided
    }

    pub fn first(&self) -> Option<&AssemblyError> {
        self.errors.first()
    }

    /// Returns `value` if nothing was recorded, otherwise a single combined
    /// error listing everything up to the limit.
    pub fn into_result<T>(self, value: T) -> Result<T, AssemblyError> {
        if self.errors.is_empty() {
            return Ok(value);
        }
        if self.errors.len() == 1 && self.elided == 0 {
            let mut errors = self.errors;
            return Err(errors.remove(0));
        }
        let mut listing = self
            .errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("\n");
        if self.elided > 0 {
            listing.push_str(&format!("\n... and {} more errors", self.elided));
        }
        Err(AssemblyError::Collected {
            count: self.count(),
            listing,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_reporter_passes_value() {
        let reporter = ErrorReporter::default();
        assert_eq!(reporter.into_result(42).unwrap(), 42);
    }

    #[test]
    fn test_single_error_is_returned_as_is() {
        let mut reporter = ErrorReporter::default();
        reporter.record(AssemblyError::Symbol {
            line: 3,
            reason: "Undefined label: foo".to_string(),
        });
        let err = reporter.into_result(()).unwrap_err();
        assert_eq!(
            err,
            AssemblyError::Symbol {
                line: 3,
                reason: "Undefined label: foo".to_string(),
            }
        );
    }

    #[test]
    fn test_errors_past_the_limit_are_elided() {
        let mut reporter = ErrorReporter::new(2);
        for line in 0..5 {
            reporter.record(AssemblyError::Encoding {
                line,
                reason: "out of range".to_string(),
            });
        }
        assert_eq!(reporter.count(), 5);
        match reporter.into_result(()).unwrap_err() {
            AssemblyError::Collected { count, listing } => {
                assert_eq!(count, 5);
                assert!(listing.contains("and 3 more errors"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
