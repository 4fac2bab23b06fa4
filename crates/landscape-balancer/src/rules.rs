//! Listener rules routing one hostname.

use landscape_core::{ListenerRule, Redirect, RuleAction, RuleCondition};

/// Header value pinning a request to the master.
pub const MASTER_HEADER_VALUE: &str = "master";
pub const REPLICA_HEADER_VALUE: &str = "replica";

/// Rules for `hostname`, most specific first:
///
/// 1. `/` redirects to the landing page
/// 2. requests carrying `forward_header: master` go to the master target group
/// 3. requests carrying `forward_header: replica` go to the public target group
/// 4. everything else goes to the public target group
pub fn hostname_rules(
    hostname: &str,
    forward_header: &str,
    master_target_group: &str,
    public_target_group: &str,
    redirect: &Redirect,
) -> Vec<ListenerRule> {
    let host = || RuleCondition::HostHeader {
        host: hostname.to_string(),
    };
    let header = |value: &str| RuleCondition::HttpHeader {
        name: forward_header.to_string(),
        value: value.to_string(),
    };
    let forward = |target_group: &str| RuleAction::Forward {
        target_group: target_group.to_string(),
    };
    let rule = |conditions, action| ListenerRule {
        arn: String::new(),
        priority: Some(0),
        conditions,
        action,
    };

    vec![
        rule(
            vec![
                host(),
                RuleCondition::PathPattern {
                    pattern: "/".to_string(),
                },
            ],
            RuleAction::Redirect(redirect.clone()),
        ),
        rule(
            vec![host(), header(MASTER_HEADER_VALUE)],
            forward(master_target_group),
        ),
        rule(
            vec![host(), header(REPLICA_HEADER_VALUE)],
            forward(public_target_group),
        ),
        rule(vec![host()], forward(public_target_group)),
    ]
}
