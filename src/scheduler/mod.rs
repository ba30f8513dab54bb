// 定时任务模块
// 基于 cron 表达式的后台任务，任务失败只记录日志

pub mod jobs;

#[cfg(test)]
mod tests;

pub use jobs::{ExpireSubscriptionsJob, PurgeProcessedEventsJob, ResetUsageJob, RetryNotificationsJob};

use crate::errors::{PlatformError, PlatformResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// 定时任务
#[async_trait]
pub trait ScheduledJob: Send + Sync {
    fn name(&self) -> &'static str;

    /// 执行一次，返回处理的记录数
    async fn run(&self) -> PlatformResult<u64>;
}

/// 解析 cron 表达式（含秒字段）
pub fn parse_schedule(expression: &str) -> PlatformResult<Schedule> {
    Schedule::from_str(expression)
        .map_err(|e| PlatformError::configuration(format!("无效的 cron 表达式 '{}': {}", expression, e)))
}

/// 下一次执行时间
pub fn next_run(schedule: &Schedule, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule.after(&after).next()
}

/// 执行一次任务并记录结果
pub async fn run_once(job: &dyn ScheduledJob) -> bool {
    match job.run().await {
        Ok(affected) => {
            info!(job = job.name(), affected, "定时任务完成");
            true
        }
        Err(e) => {
            error!(job = job.name(), error = %e, "定时任务失败");
            false
        }
    }
}

struct Entry {
    schedule: Schedule,
    job: Arc<dyn ScheduledJob>,
}

/// 任务调度器
#[derive(Default)]
pub struct Scheduler {
    entries: Vec<Entry>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, expression: &str, job: Arc<dyn ScheduledJob>) -> PlatformResult<()> {
        let schedule = parse_schedule(expression)?;
        self.entries.push(Entry { schedule, job });
        Ok(())
    }

    pub fn job_names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|e| e.job.name()).collect()
    }

    /// 每个任务一个后台循环，直到取消
    pub fn spawn(self, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        self.entries
            .into_iter()
            .map(|entry| {
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    let name = entry.job.name();
                    info!(job = name, "定时任务已启动");
                    loop {
                        let now = Utc::now();
                        let Some(next) = next_run(&entry.schedule, now) else {
                            warn!(job = name, "cron 表达式没有后续执行时间");
                            break;
                        };
                        let wait = (next - now).to_std().unwrap_or_default();

                        tokio::select! {
                            _ = shutdown.cancelled() => break,
                            _ = tokio::time::sleep(wait) => {}
                        }
                        run_once(entry.job.as_ref()).await;
                    }
                    info!(job = name, "定时任务已停止");
                })
            })
            .collect()
    }
}
