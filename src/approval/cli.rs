use crate::approval::{ApprovalBroker, ApprovalDecision, ApprovalRequest};
use anyhow::Result;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

pub struct CliApprovalBroker {
    timeout: Duration,
}

impl CliApprovalBroker {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn default_timeout() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl ApprovalBroker for CliApprovalBroker {
    fn request_approval<'a>(
        &'a self,
        request: &'a ApprovalRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ApprovalDecision>> + Send + 'a>> {
        Box::pin(async move {
            // Print formatted box to stderr
            eprintln!();
            eprintln!("┌─ Confirmation Required ──────────────────────────");
            eprintln!("│ Tool:    {}", request.tool_name);
            eprintln!("│ Args:    {}", request.args_summary);
            eprintln!("│ Risk:    {}", request.risk);
            eprintln!("│ Unit:    {}", request.requested_by);
            eprintln!("│ Reason:  {}", request.reason);
            eprintln!("├──────────────────────────────────────────────────");
            eprintln!("│ [A]pprove  [D]eny   (no reply within {}s denies)", self.timeout.as_secs());
            eprintln!("└──────────────────────────────────────────────────");
            eprint!("  > ");

            // Read input with timeout; silence is a denial
            let decision = tokio::time::timeout(self.timeout, read_single_char()).await;

            match decision {
                Ok(Ok(ch)) => match ch.to_ascii_lowercase() {
                    'a' => Ok(ApprovalDecision::Approved),
                    'd' => Ok(ApprovalDecision::Denied {
                        reason: "denied by operator".to_string(),
                    }),
                    _ => Ok(ApprovalDecision::Denied {
                        reason: format!("unrecognized input: '{ch}'"),
                    }),
                },
                Ok(Err(e)) => Ok(ApprovalDecision::Denied {
                    reason: format!("input error: {e}"),
                }),
                Err(_) => Ok(ApprovalDecision::Denied {
                    reason: "approval timed out".to_string(),
                }),
            }
        })
    }
}

async fn read_single_char() -> Result<char> {
    // Use tokio::task::spawn_blocking since stdin is blocking
    let ch = tokio::task::spawn_blocking(|| {
        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;
        input
            .trim()
            .chars()
            .next()
            .ok_or_else(|| anyhow::anyhow!("no input received"))
    })
    .await??;
    Ok(ch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_approval_broker_new_with_timeout() {
        let broker = CliApprovalBroker::new(Duration::from_secs(60));
        assert_eq!(broker.timeout, Duration::from_secs(60));
    }

    #[test]
    fn cli_approval_broker_default_timeout() {
        let broker = CliApprovalBroker::default_timeout();
        assert_eq!(broker.timeout, Duration::from_secs(30));
    }
}
