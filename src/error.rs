use thiserror::Error;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Every variant aborts at most the function it was raised for. The object-level driver
/// ([`crate::Decompiler::decompile_object`]) reports errors per function and keeps going.
///
/// # Error Categories
///
/// ## Input Errors
/// - [`Error::Malformed`] - Bytecode that violates the instruction set (bad arity, jump out of range)
/// - [`Error::UnresolvedReference`] - Debug information or a lookup names something the object lacks
///
/// ## Recovery Errors
/// - [`Error::Unstructured`] - A jump pattern that has no structured equivalent
///
/// ## Assembly Errors
/// - [`Error::UndefinedLabel`] / [`Error::DuplicateLabel`] - Label misuse in [`crate::pex::FunctionAssembler`]
///
/// ## I/O Errors
/// - [`Error::FileError`] - Filesystem errors, only raised by explicit trace-file helpers
///
/// # Examples
///
/// ```rust,no_run
/// use pexscope::{Decompiler, DecompilerConfig, Error};
/// # fn run(decompiler: &Decompiler, object: &pexscope::pex::Object, function: &pexscope::pex::Function) {
/// match decompiler.decompile_function(object, "", function) {
///     Ok(result) => println!("{} lines", result.lines().len()),
///     Err(Error::Malformed { message, file, line }) => {
///         eprintln!("Malformed bytecode: {} ({}:{})", message, file, line);
///     }
///     Err(Error::Unstructured { function, address, reason }) => {
///         eprintln!("{function}: cannot structure jump at {address}: {reason}");
///     }
///     Err(e) => eprintln!("Other error: {}", e),
/// }
/// # }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The bytecode is damaged and could not be decompiled.
    ///
    /// Raised for opcodes with the wrong operand count, jump offsets that are not integers
    /// and jump targets outside of the function. The error includes the source location
    /// where the malformation was detected for debugging purposes.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// A name could not be resolved against the object it should belong to.
    ///
    /// Debug tables that name a struct member, property or function the object does not
    /// declare, or a lookup by name that finds nothing. Carries the offending name.
    #[error("Unresolved reference - {0}")]
    UnresolvedReference(String),

    /// A jump pattern could not be expressed with `If`, `While` or `Guard`.
    ///
    /// Papyrus has no `goto`, `break` or `continue`; bytecode that needs one of them was not
    /// produced by the stock compiler and is rejected rather than approximated.
    #[error("Unstructured control flow in {function} at instruction {address}: {reason}")]
    Unstructured {
        /// Name of the function being decompiled
        function: String,
        /// Instruction index of the offending jump
        address: usize,
        /// Short description of the pattern
        reason: &'static str,
    },

    /// A branch referenced a label that was never defined.
    #[error("Undefined label - {0}")]
    UndefinedLabel(String),

    /// A label was defined twice.
    #[error("Duplicate label - {0}")]
    DuplicateLabel(String),

    /// File I/O error.
    ///
    /// Wraps standard I/O errors that can occur while writing trace logs.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),
}
