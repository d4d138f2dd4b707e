//! Exit code constants for the patchloop CLI.
//!
//! # Exit Code Table
//!
//! | Code | Constant | Description |
//! |------|----------|-------------|
//! | 0 | `SUCCESS` | Operation completed successfully |
//! | 1 | `INTERNAL` | General/internal failure |
//! | 2 | `CLI_ARGS` | Invalid CLI arguments or configuration |
//! | 3 | `PATCH_INVALID` | Generated patch failed validation |
//! | 4 | `APPLY_FAILED` | Patch could not be applied |
//! | 5 | `DIRTY_TREE` | Working tree has uncommitted changes |
//! | 6 | `NOT_FOUND` | Plan or patch not found |
//! | 9 | `LOCK_HELD` | Another process holds the plan lock |
//! | 11 | `VERIFICATION_FAILED` | Verification finished without a passing round |
//! | 70 | `LLM_FAILURE` | Planner/generator backend failed |

/// Type-safe process exit code.
///
/// ```rust
/// use patchloop_utils::ExitCode;
///
/// assert_eq!(ExitCode::DIRTY_TREE.as_i32(), 5);
/// assert_eq!(ExitCode::SUCCESS, ExitCode::from_i32(0));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCode(i32);

impl ExitCode {
    pub const SUCCESS: ExitCode = ExitCode(0);

    /// General failure
    pub const INTERNAL: ExitCode = ExitCode(1);

    /// Invalid CLI arguments or configuration values
    pub const CLI_ARGS: ExitCode = ExitCode(2);

    /// Generator output rejected by the implementer's validation
    pub const PATCH_INVALID: ExitCode = ExitCode(3);

    /// Every apply strategy failed (or the selection was empty)
    pub const APPLY_FAILED: ExitCode = ExitCode(4);

    /// Working tree not clean when a clean tree is required
    pub const DIRTY_TREE: ExitCode = ExitCode(5);

    /// Plan record missing, or plan has no final patch
    pub const NOT_FOUND: ExitCode = ExitCode(6);

    /// Another process is operating on the same plan
    pub const LOCK_HELD: ExitCode = ExitCode(9);

    /// Verify loop ended without a passing round
    pub const VERIFICATION_FAILED: ExitCode = ExitCode(11);

    /// LLM backend unreachable or returned garbage
    pub const LLM_FAILURE: ExitCode = ExitCode(70);

    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self.0
    }

    #[must_use]
    pub const fn from_i32(code: i32) -> Self {
        ExitCode(code)
    }
}

impl From<i32> for ExitCode {
    fn from(code: i32) -> Self {
        ExitCode(code)
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_values_are_stable() {
        assert_eq!(ExitCode::SUCCESS.as_i32(), 0);
        assert_eq!(ExitCode::INTERNAL.as_i32(), 1);
        assert_eq!(ExitCode::CLI_ARGS.as_i32(), 2);
        assert_eq!(ExitCode::PATCH_INVALID.as_i32(), 3);
        assert_eq!(ExitCode::APPLY_FAILED.as_i32(), 4);
        assert_eq!(ExitCode::DIRTY_TREE.as_i32(), 5);
        assert_eq!(ExitCode::NOT_FOUND.as_i32(), 6);
        assert_eq!(ExitCode::LOCK_HELD.as_i32(), 9);
        assert_eq!(ExitCode::VERIFICATION_FAILED.as_i32(), 11);
        assert_eq!(ExitCode::LLM_FAILURE.as_i32(), 70);
    }

    #[test]
    fn test_conversions() {
        let code: ExitCode = 4.into();
        assert_eq!(code, ExitCode::APPLY_FAILED);
        let raw: i32 = ExitCode::LOCK_HELD.into();
        assert_eq!(raw, 9);
    }
}
