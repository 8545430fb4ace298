//! Read access to enrollments.

use crate::AppCore;
use crate::error::{NurtureError, Result};
use crate::models::{EnrollmentStatus, FlowEnrollment};

pub fn get_enrollment(core: &AppCore, id: &str) -> Result<FlowEnrollment> {
    core.storage
        .enrollments
        .get(id)?
        .ok_or_else(|| NurtureError::EnrollmentNotFound(id.to_string()))
}

/// Enrollments of a flow, newest first, optionally narrowed to one status.
pub fn list_for_flow(
    core: &AppCore,
    flow_id: &str,
    status: Option<EnrollmentStatus>,
) -> Result<Vec<FlowEnrollment>> {
    if !core.storage.flows.exists(flow_id)? {
        return Err(NurtureError::FlowNotFound(flow_id.to_string()));
    }
    let mut enrollments = core.storage.enrollments.list_by_flow(flow_id, status)?;
    enrollments.sort_by(|a, b| b.entered_at.cmp(&a.entered_at));
    Ok(enrollments)
}

pub fn list_for_user(core: &AppCore, user_id: &str) -> Result<Vec<FlowEnrollment>> {
    let mut enrollments = core.storage.enrollments.list_by_user(user_id)?;
    enrollments.sort_by(|a, b| b.entered_at.cmp(&a.entered_at));
    Ok(enrollments)
}
