//! # Clowdr Playout
//!
//! Broadcast infrastructure for conference rooms. Each broadcast room gets
//! its own CloudFormation channel stack (RTMP input, MediaLive channel,
//! MediaPackage HLS endpoint); deployment progress comes back as SNS
//! notifications on `POST /aws/cloudformation/notify` and is re-published
//! as [`StackEvent`]s.
//!
//! ```ignore
//! let aws = Arc::new(AwsService::new(config.aws, config.host, deployer, subscriber));
//! aws.init().await?;
//! let mut events = aws.stack_events();
//! aws.create_new_channel_stack(room_id, "Main stage", conference_id).await?;
//! ```

pub mod aws;
pub mod channel_stack;
pub mod config;
pub mod error;
pub mod notify;
pub mod sns;

pub use aws::{
    AwsService, DeployRequest, DeployStackResult, NOTIFY_PATH, StackDeployer, TemplateDirDeployer,
    TopicSubscriber,
};
pub use channel_stack::{ChannelStack, ChannelStackProps, short_id};
pub use config::{AwsConfig, ConfigError, HostConfig, PlayoutConfig};
pub use error::{PlayoutError, PlayoutResult};
pub use notify::{
    HttpConfirmer, NotifyState, SnsMessage, StackEvent, SubscriptionConfirmer, build_router,
};
pub use sns::SnsSubscriber;
