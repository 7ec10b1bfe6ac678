//! The process-wide convention for propagating tenant identity across every
//! in-process call and outbound request boundary (tenant context
//! propagation). A missing injection at any of these boundaries is a
//! correctness bug, not a performance one.

use reqwest::RequestBuilder;
use ruler_api::TenantId;

pub const TENANT_HEADER_NAME: &str = "X-Scope-OrgID";

/// Inject the tenant identifier into an outbound request before transport,
/// the way every notifier HTTP call and every inspection RPC peer call must.
pub fn inject_header(builder: RequestBuilder, tenant: &TenantId) -> RequestBuilder {
    builder.header(TENANT_HEADER_NAME, tenant.as_str())
}
