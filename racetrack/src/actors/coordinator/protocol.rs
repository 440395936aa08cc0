//! CoordinatorActor message protocol and the join barrier over host replies.

use racetrack_types::{
    ClusterInfo, FailureKind, LifecycleReply, LifecycleRequest, MetricsSnapshot, SystemInfo,
};
use ractor::RpcReplyPort;

/// Messages handled by CoordinatorActor
#[derive(Debug)]
pub enum CoordinatorMsg {
    /// A lifecycle request from the control loop. Answered once all hosts
    /// have replied.
    Lifecycle {
        request: LifecycleRequest,
        reply: RpcReplyPort<LifecycleReply>,
    },
    /// Reply of the host at `index` to the outstanding request `request_id`.
    HostReplied {
        request_id: u64,
        index: usize,
        reply: LifecycleReply,
    },
}

/// Combine the replies of all hosts to one request into a single reply.
///
/// - any `Failure`: the first failure in host order
/// - all `EngineStarted`: cluster infos merged, system infos unioned
/// - all `EngineStopped`: snapshots concatenated
/// - all `Success`: `Success`
///
/// Anything else is a mix the protocol does not allow.
pub fn aggregate(request: &str, replies: Vec<LifecycleReply>) -> LifecycleReply {
    if replies.is_empty() {
        return LifecycleReply::failure(
            FailureKind::Setup,
            format!("No host received {request}"),
            "",
        );
    }
    if let Some(failure) = replies.iter().find(|r| r.is_failure()) {
        return failure.clone();
    }

    let names: Vec<&'static str> = replies.iter().map(LifecycleReply::name).collect();
    if replies
        .iter()
        .all(|r| matches!(r, LifecycleReply::EngineStarted { .. }))
    {
        let mut infos = Vec::with_capacity(replies.len());
        let mut system_info = SystemInfo::new();
        for reply in replies {
            if let LifecycleReply::EngineStarted {
                cluster_info,
                system_info: host_info,
            } = reply
            {
                infos.push(cluster_info);
                system_info.extend(host_info);
            }
        }
        return LifecycleReply::EngineStarted {
            cluster_info: ClusterInfo::merge(infos),
            system_info,
        };
    }
    if replies
        .iter()
        .all(|r| matches!(r, LifecycleReply::EngineStopped { .. }))
    {
        let mut merged = MetricsSnapshot::default();
        for reply in replies {
            if let LifecycleReply::EngineStopped { system_metrics } = reply {
                merged.meta_info.extend(system_metrics.meta_info);
                merged.records.extend(system_metrics.records);
            }
        }
        return LifecycleReply::EngineStopped {
            system_metrics: merged,
        };
    }
    if replies.iter().all(|r| matches!(r, LifecycleReply::Success)) {
        return LifecycleReply::Success;
    }

    LifecycleReply::failure(
        FailureKind::Execution,
        format!("Hosts disagree on the outcome of {request}"),
        names.join(", "),
    )
}
