/// Thin wrapper matching the way every other workspace service boots tracing
/// via `conhub_observability::init_tracing_for`.
pub fn init() {
    conhub_observability::init_tracing_for("query_core");
}
