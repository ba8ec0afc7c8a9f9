//! Wire names of the analysis server's methods.
//!
//! Methods are opaque to the transport; these constants only spare callers
//! from typing the strings. Unknown names are passed through verbatim.

/// Liveness probe. Takes no parameters, answers `"pong"`.
pub const PING: &str = "ping";

/// Summary of a binary: architecture, platform, entry point, sizes.
pub const GET_BINARY_INFO: &str = "get_binary_info";
/// Names of every function in a binary.
pub const LIST_FUNCTIONS: &str = "list_functions";
/// Disassembly of one function.
pub const DISASSEMBLE_FUNCTION: &str = "disassemble_function";
/// Decompiled C of one function.
pub const DECOMPILE_FUNCTION: &str = "decompile_function";
/// Sections with bounds and semantics.
pub const LIST_SECTIONS: &str = "list_sections";
/// Cross references to a function.
pub const GET_XREFS: &str = "get_xrefs";
/// Strings of at least `min_length` characters.
pub const GET_STRINGS: &str = "get_strings";
/// Types defined in a binary.
pub const GET_TYPES: &str = "get_types";
/// Generate a C header, optionally written to `output_path`.
pub const GENERATE_HEADER: &str = "generate_header";
/// Generate C source, optionally written to `output_path`.
pub const GENERATE_SOURCE: &str = "generate_source";
/// Write header, source and build files into `output_dir`.
pub const REBUILD_DRIVER: &str = "rebuild_driver";

/// Tool catalog advertised by the server.
pub const LIST_TOOLS: &str = "list_tools";
/// Static resources advertised by the server.
pub const LIST_RESOURCES: &str = "list_resources";
/// Resource URI templates advertised by the server.
pub const LIST_RESOURCE_TEMPLATES: &str = "list_resource_templates";
/// Read a `binary://` resource.
pub const READ_RESOURCE: &str = "read_resource";
/// Invoke a tool by name with an argument object.
pub const CALL_TOOL: &str = "call_tool";

/// Methods that write files on the server side.
const SIDE_EFFECTING: &[&str] = &[GENERATE_HEADER, GENERATE_SOURCE, REBUILD_DRIVER];

/// Check whether repeating `method` is known to be harmless.
///
/// Unknown methods are treated as idempotent queries.
pub fn is_idempotent(method: &str) -> bool {
    !SIDE_EFFECTING.contains(&method)
}
