use std::sync::atomic::{AtomicBool, Ordering};

use super::RecognitionError;

/// 识别闸门：同一时刻只允许一条 截图->匹配 流水线在跑。
///
/// 状态机只有 Idle / Running 两态。Running 期间到达的调用立即拿到
/// `AlreadyRunning` 被拒绝，不排队也不自动重试。
#[derive(Debug)]
pub struct RecognitionGate {
    running: AtomicBool,
}

impl RecognitionGate {
    pub const fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
        }
    }

    /// Idle -> Running。成功返回 RAII 许可，失败说明已有识别在执行。
    pub fn try_acquire(&self) -> Result<GatePermit<'_>, RecognitionError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            Ok(GatePermit { gate: self })
        } else {
            Err(RecognitionError::AlreadyRunning)
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// 闸门许可。Drop 时恢复 Idle，任何错误路径都不会让闸门卡在 Running。
pub struct GatePermit<'a> {
    gate: &'a RecognitionGate,
}

impl Drop for GatePermit<'_> {
    fn drop(&mut self) {
        self.gate.running.store(false, Ordering::SeqCst);
    }
}

/// 进程级闸门，所有识别命令共用
pub static GATE: RecognitionGate = RecognitionGate::new();

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn second_acquire_is_rejected() {
        let gate = RecognitionGate::new();
        let permit = gate.try_acquire().expect("first acquire");
        assert_eq!(
            gate.try_acquire().unwrap_err(),
            RecognitionError::AlreadyRunning
        );
        drop(permit);
        assert!(gate.try_acquire().is_ok());
    }

    #[test]
    fn gate_recovers_after_error_path() {
        let gate = RecognitionGate::new();
        let result: Result<(), RecognitionError> = (|| {
            let _permit = gate.try_acquire()?;
            Err(RecognitionError::Capture("no monitor found".into()))
        })();
        assert!(result.is_err());
        assert!(!gate.is_running());
        assert!(gate.try_acquire().is_ok());
    }

    #[test]
    fn rejected_call_never_reaches_capture() {
        let gate = RecognitionGate::new();
        let captures = AtomicUsize::new(0);
        let run = |gate: &RecognitionGate| -> Result<(), RecognitionError> {
            let _permit = gate.try_acquire()?;
            captures.fetch_add(1, Ordering::SeqCst);
            Ok(())
        };

        let held = gate.try_acquire().expect("hold the gate");
        assert_eq!(run(&gate).unwrap_err(), RecognitionError::AlreadyRunning);
        assert_eq!(captures.load(Ordering::SeqCst), 0);

        drop(held);
        assert!(run(&gate).is_ok());
        assert_eq!(captures.load(Ordering::SeqCst), 1);
    }
}
