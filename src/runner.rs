//! Drives cases against the server and feeds outcomes to the reporter.

use std::io::Write;

use crate::classifier::{Budget, classify};
use crate::config::RunConfig;
use crate::error::HarnessError;
use crate::harness::Connector;
use crate::report::Reporter;
use crate::session::Session;
use crate::testcase::{Case, CaseContext, FailReason, Node, Outcome, Section, Verdict};

/// Runs cases one at a time, each on its own fresh connection.
pub struct Runner<C> {
    config: RunConfig,
    connector: C,
}

impl<C: Connector> Runner<C> {
    pub fn new(config: RunConfig, connector: C) -> Self {
        Self { config, connector }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn into_connector(self) -> C {
        self.connector
    }

    fn context(&self) -> CaseContext {
        CaseContext {
            authority: self.config.authority(),
            scheme: self.config.scheme(),
        }
    }

    /// Run one case to completion. Never fails: every error becomes a
    /// failing [`Outcome`].
    pub async fn run_case(&self, case: &Case) -> Outcome {
        tracing::debug!(id = %case.id, description = case.description, "running case");

        let verdict = self.drive(case).await;
        match &verdict {
            Verdict::Pass { matched } => tracing::debug!(id = %case.id, %matched, "passed"),
            Verdict::Fail(reason) => tracing::debug!(id = %case.id, %reason, "failed"),
        }

        Outcome {
            id: case.id.clone(),
            description: case.description,
            requirement: case.requirement,
            verdict,
        }
    }

    async fn drive(&self, case: &Case) -> Verdict {
        let mut session =
            match Session::open(&self.connector, case.handshake, self.config.timeout).await {
                Ok(session) => session,
                Err(e) => {
                    tracing::warn!(id = %case.id, error = %e, "session setup failed");
                    return Verdict::Fail(FailReason::Setup(setup_message(e)));
                }
            };

        let steps = (case.build)(&self.context());
        let mut verdict = None;
        for step in &steps {
            if let Err(e) = session.execute(step).await {
                tracing::debug!(id = %case.id, error = %e, "write failed");
                verdict = Some(Verdict::Fail(FailReason::Write(write_message(e))));
                break;
            }
        }

        let verdict = match verdict {
            Some(verdict) => verdict,
            None => {
                classify(
                    &mut session,
                    &case.expectations,
                    Budget::start(self.config.timeout),
                )
                .await
            }
        };

        session.close().await;
        verdict
    }

    /// Walk `root` depth first, running every case the filter selects and
    /// recording skips for the rest.
    pub async fn run_suite<W: Write>(&self, root: &Section, reporter: &mut Reporter<W>) {
        self.run_nodes(&root.children, root.depth, reporter).await;
    }

    async fn run_nodes<W: Write>(&self, nodes: &[Node], depth: usize, reporter: &mut Reporter<W>) {
        for node in nodes {
            match node {
                Node::Case(case) => {
                    if self.config.filter.selects(&case.id) {
                        let outcome = self.run_case(case).await;
                        reporter.record(&outcome, depth);
                    } else {
                        reporter.skip(1);
                    }
                }
                Node::Section(section) => {
                    let selected = section
                        .cases()
                        .iter()
                        .filter(|c| self.config.filter.selects(&c.id))
                        .count();
                    let total = section.cases().len();

                    if selected == 0 || !self.config.filter.enters(&section.id) {
                        reporter.skip(total);
                        continue;
                    }

                    reporter.enter_section(&section.id, &section.title, section.depth);
                    Box::pin(self.run_nodes(&section.children, section.depth, reporter)).await;
                    reporter.leave_section();
                }
            }
        }
    }
}

fn setup_message(e: HarnessError) -> String {
    match e {
        HarnessError::Connect(msg) => msg,
        other => other.to_string(),
    }
}

fn write_message(e: HarnessError) -> String {
    match e {
        HarnessError::Write(io) => io.to_string(),
        other => other.to_string(),
    }
}
