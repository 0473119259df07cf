//! Handler bodies for the three message channels (§4.8). Every entry
//! point here is wrapped in `recovery::with_recovery`/`with_recovery_async`
//! at the call site so a bug in one handler can't take the loop down.

use super::state::DaemonState;
use crate::message::schema;
use crate::message::types::{ContainerListing, DownstreamEvent, PublishMsg, RpcReply, RpcRequest};
use crate::registry::RunRequest;
use crate::types::{ClientId, ContainerId, Pid, Result};
use std::cell::RefCell;
use std::rc::Rc;
use tokio::process::Child;

/// What the rpc connection handler needs to do after a `run` succeeds:
/// reply with `process_start`, optionally publish `container_start`
/// first, and hand the spawned child off to the reaper loop.
pub struct RunOutcome {
    pub reply: RpcReply,
    pub container_start_publish: Option<PublishMsg>,
    pub spawned: Option<(ContainerId, Pid, Child)>,
}

pub async fn handle_rpc_request(
    state: Rc<RefCell<DaemonState>>,
    client: ClientId,
    request: RpcRequest,
) -> Result<RunOutcome> {
    match request {
        RpcRequest::List => {
            let payload: Vec<ContainerListing> = state
                .borrow()
                .containers
                .list()
                .into_iter()
                .map(|(container_uuid, pids)| ContainerListing {
                    container_uuid,
                    pids: pids.into_iter().map(|p| p.0).collect(),
                })
                .collect();
            Ok(RunOutcome {
                reply: RpcReply::List { payload },
                container_start_publish: None,
                spawned: None,
            })
        }

        RpcRequest::Setpower { limit } => {
            // §4.7: a policy decision hook sets a new cap via `command`,
            // which clamps and programs each configured RAPL domain.
            // `setpower` takes effect at the next sensor publish and the
            // next control step (§5) — `power_limit` is read by both.
            let actions = {
                let mut state_mut = state.borrow_mut();
                state_mut.power_limit = limit;
                state_mut.controller.command(limit)
            };
            for (domain, watts) in actions {
                let result = {
                    let state_ref = state.borrow();
                    state_ref.sensors.set_powerlimit(&domain, watts).await
                };
                if let Err(e) = result {
                    tracing::warn!(error = %e, domain = %domain, "failed to program rapl domain");
                }
            }
            Ok(RunOutcome {
                reply: RpcReply::Getpower { limit },
                container_start_publish: None,
                spawned: None,
            })
        }

        RpcRequest::Kill { container_uuid } => {
            let mut state_mut = state.borrow_mut();
            let pids = state_mut.containers.kill(&container_uuid)?;
            state_mut.kill_container(&pids);
            Ok(RunOutcome {
                reply: RpcReply::List { payload: Vec::new() },
                container_start_publish: None,
                spawned: None,
            })
        }

        RpcRequest::Run {
            manifest,
            path,
            args,
            container_uuid,
            environ,
        } => {
            let request = RunRequest {
                client,
                manifest_path: manifest,
                command: path,
                args,
                container_uuid: container_uuid.clone(),
                environ,
            };

            let outcome = {
                let mut state_mut = state.borrow_mut();
                state_mut.containers.create(request).await
            };

            match outcome {
                Ok(outcome) => {
                    let publish = if outcome.is_first_process {
                        Some(PublishMsg::ContainerStart {
                            container_uuid: container_uuid.clone(),
                            errno: 0,
                            power: None,
                        })
                    } else {
                        None
                    };
                    Ok(RunOutcome {
                        reply: RpcReply::ProcessStart {
                            container_uuid: container_uuid.clone(),
                            pid: outcome.pid.0,
                        },
                        container_start_publish: publish,
                        spawned: Some((container_uuid, outcome.pid, outcome.child)),
                    })
                }
                Err(e) => Ok(RunOutcome {
                    reply: RpcReply::RunError {
                        container_uuid,
                        errno: e.errno(),
                        message: e.to_string(),
                    },
                    container_start_publish: None,
                    spawned: None,
                }),
            }
        }
    }
}

/// Downstream event dispatch (§4.8). Returns zero or more publish
/// messages the caller should broadcast (e.g. `progress` mirrors the
/// incoming event onto the publish channel).
pub async fn handle_downstream_event(
    state: Rc<RefCell<DaemonState>>,
    event: DownstreamEvent,
) -> Result<Vec<PublishMsg>> {
    match event {
        DownstreamEvent::ApplicationStart {
            container_uuid,
            application_uuid,
        } => {
            let mut state_mut = state.borrow_mut();
            let containers = &state_mut.containers;
            state_mut
                .applications
                .register(application_uuid, container_uuid, containers)?;
            Ok(Vec::new())
        }

        DownstreamEvent::ApplicationExit { application_uuid } => {
            state.borrow_mut().applications.delete(&application_uuid)?;
            Ok(Vec::new())
        }

        DownstreamEvent::Progress {
            payload,
            application_uuid,
            container_uuid: _,
        } => {
            let mut state_mut = state.borrow_mut();
            state_mut.applications.accumulate_progress(&application_uuid, payload)?;
            let now = state_mut.now_secs();
            state_mut.controller.feed_performance(now, payload);
            Ok(vec![PublishMsg::Progress {
                application_uuid,
                payload,
            }])
        }

        DownstreamEvent::Performance {
            payload,
            application_uuid: _,
            container_uuid,
        } => {
            let mut state_mut = state.borrow_mut();
            let now = state_mut.now_secs();
            state_mut.controller.feed_performance(now, payload);
            Ok(vec![PublishMsg::Performance {
                container_uuid,
                payload,
            }])
        }

        DownstreamEvent::PhaseContext {
            cpu,
            aggregation,
            computetime,
            totaltime,
            application_uuid,
        } => {
            let mut state_mut = state.borrow_mut();
            let container_uuid = state_mut
                .applications
                .get(&application_uuid)
                .map(|a| a.container_uuid.clone())
                .ok_or_else(|| crate::types::Error::unknown_application(application_uuid.to_string()))?;

            if let Some(policy) = state_mut.containers.policy_mut(&container_uuid) {
                policy.set_context(cpu, computetime, totaltime, aggregation);
                policy.run_policy();
            }
            Ok(Vec::new())
        }
    }
}

pub fn encode_publish(msg: &PublishMsg) -> Result<Vec<u8>> {
    schema::encode_publish(msg)
}
