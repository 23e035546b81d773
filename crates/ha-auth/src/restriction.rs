//! Narrowing the selectable users by client network

use std::net::IpAddr;

use tracing::debug;

use crate::config::{TrustedUserEntry, UserRestriction};
use crate::models::{CandidateUser, User};
use crate::network::canonical_ip;

/// Users a client at `ip` may log in as.
///
/// System generated and inactive users are never candidates. The first
/// restriction whose network contains `ip` is applied and the rest are
/// ignored; without a matching restriction every active user is returned.
pub fn filter_candidates(
    ip: IpAddr,
    users: &[User],
    restrictions: &[UserRestriction],
) -> Vec<CandidateUser> {
    let ip = canonical_ip(ip);
    let active = users.iter().filter(|u| u.can_login());

    let Some(restriction) = restrictions.iter().find(|r| r.network.contains(&ip)) else {
        return active.map(CandidateUser::from).collect();
    };

    debug!("Applying trusted_users restriction for {} to {}", restriction.network, ip);

    let (user_ids, group_ids): (Vec<&str>, Vec<&str>) = restriction.allowed.iter().fold(
        (Vec::new(), Vec::new()),
        |(mut users, mut groups), entry| {
            match entry {
                TrustedUserEntry::UserId(id) => users.push(id.as_str()),
                TrustedUserEntry::Group(id) => groups.push(id.as_str()),
            }
            (users, groups)
        },
    );

    active
        .filter(|user| {
            user_ids.contains(&user.id.as_str())
                || user.group_ids.iter().any(|g| group_ids.contains(&g.as_str()))
        })
        .map(CandidateUser::from)
        .collect()
}
