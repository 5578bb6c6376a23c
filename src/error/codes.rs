/// Error code registry for the installer
///
/// Error codes are organized by category:
/// - 1000-1999: Configuration errors
/// - 2000-2999: Session errors
/// - 4000-4999: Execution errors
/// - 5000-5999: Workflow errors
/// - 9000-9999: Other errors
#[allow(dead_code)]
pub struct ErrorCode;

impl ErrorCode {
    // Configuration errors (1000-1999)
    pub const CONFIG_GENERIC: u16 = 1000;
    pub const CONFIG_NOT_FOUND: u16 = 1001;
    pub const CONFIG_INVALID_YAML: u16 = 1002;
    pub const CONFIG_INVALID_JSON: u16 = 1003;
    pub const CONFIG_MISSING_VARIABLE: u16 = 1004;
    pub const CONFIG_INVALID_VALUE: u16 = 1005;

    // Session errors (2000-2999)
    pub const SESSION_GENERIC: u16 = 2000;
    pub const SESSION_FOLDER_ERROR: u16 = 2001;
    pub const SESSION_ARCHIVE_FAILED: u16 = 2002;
    pub const SESSION_LOGGING_FAILED: u16 = 2003;
    pub const SESSION_ARTIFACT_ERROR: u16 = 2004;

    // Execution errors (4000-4999)
    pub const EXEC_GENERIC: u16 = 4000;
    pub const EXEC_COMMAND_NOT_FOUND: u16 = 4001;
    pub const EXEC_TIMEOUT: u16 = 4002;
    pub const EXEC_SUBPROCESS_FAILED: u16 = 4003;
    pub const EXEC_SIGNAL_RECEIVED: u16 = 4005;
    pub const EXEC_INTERRUPTED: u16 = 4006;
    pub const EXEC_SPAWN_FAILED: u16 = 4007;
    pub const EXEC_OUTPUT_ERROR: u16 = 4008;
    pub const EXEC_STDIN_ERROR: u16 = 4009;
    pub const EXEC_CONSUMER_FAILED: u16 = 4011;

    // Workflow errors (5000-5999)
    pub const WORKFLOW_GENERIC: u16 = 5000;
    pub const WORKFLOW_STEP_FAILED: u16 = 5003;
    pub const WORKFLOW_VALIDATION_FAILED: u16 = 5004;
    pub const WORKFLOW_CANCELLED: u16 = 5006;
    pub const WORKFLOW_REQUIREMENTS_UNMET: u16 = 5013;
    pub const WORKFLOW_CONFLICTING_INSTALL: u16 = 5014;

    // Other errors (9000-9999)
    pub const OTHER_GENERIC: u16 = 9000;
    pub const OTHER_UNEXPECTED: u16 = 9001;
    pub const OTHER_INTERNAL_ERROR: u16 = 9004;
}

/// Get a human-readable description for an error code
pub fn describe_error_code(code: u16) -> &'static str {
    match code {
        // Configuration errors
        1000 => "Generic configuration error",
        1001 => "Configuration file not found",
        1002 => "Invalid YAML syntax in configuration",
        1003 => "Invalid JSON syntax in configuration",
        1004 => "Configuration variable is not defined",
        1005 => "Invalid value in configuration",

        // Session errors
        2000 => "Generic session error",
        2001 => "Session folder could not be prepared",
        2002 => "Session logs could not be archived",
        2003 => "Session logging could not be configured",
        2004 => "Command artifact could not be written",

        // Execution errors
        4000 => "Generic execution error",
        4001 => "Command not found",
        4002 => "Command execution timeout",
        4003 => "Subprocess failed",
        4005 => "Command received signal",
        4006 => "Command execution interrupted",
        4007 => "Failed to spawn subprocess",
        4008 => "Command output error",
        4009 => "Command stdin error",
        4011 => "Command output consumer failed",

        // Workflow errors
        5000 => "Generic workflow error",
        5003 => "Workflow step failed",
        5004 => "Workflow validation failed",
        5006 => "Workflow cancelled",
        5013 => "Workflow requirements are not fulfilled",
        5014 => "Conflicting installation found",

        // Other errors
        9000 => "Generic error",
        9001 => "Unexpected error",
        9004 => "Internal error",

        _ => "Unknown error code",
    }
}
