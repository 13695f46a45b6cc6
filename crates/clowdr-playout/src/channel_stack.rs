//! CloudFormation template for a room's broadcast channel
//!
//! A channel stack wires an RTMP push input into a single-pipeline MediaLive
//! channel whose output is packaged as HLS by MediaPackage:
//!
//! ```text
//! RTMP push -> MediaLive::Input -> MediaLive::Channel -> MediaPackage::Channel -> HLS endpoint
//! ```

use std::collections::BTreeMap;

use clowdr_core::{ConferenceId, RoomId};
use rand::Rng;
use serde_json::{Value, json};

const SHORT_ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz1234567890";

/// Default length of generated short ids, including the leading `C`
pub const DEFAULT_SHORT_ID_LENGTH: usize = 6;

/// `C` followed by `length - 1` random characters from `[a-z0-9]`
///
/// The leading letter keeps ids valid where AWS requires names to start
/// with a letter.
pub fn short_id(length: usize) -> String {
    let mut rng = rand::rng();
    let mut id = String::with_capacity(length.max(1));
    id.push('C');
    for _ in 1..length {
        let index = rng.random_range(0..SHORT_ID_ALPHABET.len());
        id.push(char::from(SHORT_ID_ALPHABET[index]));
    }
    id
}

/// Inputs for one room's channel stack
#[derive(Debug, Clone)]
pub struct ChannelStackProps {
    pub aws_prefix: String,
    pub input_security_group_id: String,
    pub media_live_service_role_arn: String,
    pub room_id: RoomId,
    pub room_name: String,
    pub conference_id: ConferenceId,
    pub account: String,
    pub region: String,
}

impl ChannelStackProps {
    /// Tags applied to the stack and every taggable resource
    pub fn tags(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("roomId".to_string(), self.room_id.to_string()),
            ("roomName".to_string(), self.room_name.clone()),
            ("conferenceId".to_string(), self.conference_id.to_string()),
        ])
    }

    pub fn description(&self) -> String {
        format!("Broadcast channel stack for room {}", self.room_id)
    }
}

/// A synthesized stack, ready to hand to a deployer
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelStack {
    pub stack_name: String,
    pub description: String,
    pub tags: BTreeMap<String, String>,
    pub account: String,
    pub region: String,
    pub template: Value,
}

impl ChannelStack {
    /// Synthesize the stack `<prefix>-room-<stack_id>`
    ///
    /// `generate_id` names the individual resources; it is called once per
    /// resource so names stay unique across stacks.
    pub fn synthesize(
        props: &ChannelStackProps,
        stack_id: &str,
        mut generate_id: impl FnMut() -> String,
    ) -> Self {
        let stack_name = format!("{}-room-{}", props.aws_prefix, stack_id);
        let tags = props.tags();
        let description = props.description();

        let input_name = format!("{}-{}", props.aws_prefix, generate_id());
        let package_channel_id = format!("{}-{}", props.aws_prefix, generate_id());
        let endpoint_id = format!("{}-{}", props.aws_prefix, generate_id());
        let channel_name = format!("{}-{}", props.aws_prefix, generate_id());

        let map_tags = json!(tags);
        let list_tags: Vec<Value> = tags
            .iter()
            .map(|(key, value)| json!({ "Key": key, "Value": value }))
            .collect();

        let template = json!({
            "AWSTemplateFormatVersion": "2010-09-09",
            "Description": description,
            "Resources": {
                "RtmpPushInput": {
                    "Type": "AWS::MediaLive::Input",
                    "Properties": {
                        "Name": input_name,
                        "Type": "RTMP_PUSH",
                        "InputSecurityGroups": [props.input_security_group_id],
                        "Destinations": [{ "StreamName": format!("{}/stream", stack_id) }],
                        "Tags": map_tags,
                    }
                },
                "PackageChannel": {
                    "Type": "AWS::MediaPackage::Channel",
                    "Properties": {
                        "Id": package_channel_id,
                        "Description": description,
                        "Tags": list_tags,
                    }
                },
                "HlsEndpoint": {
                    "Type": "AWS::MediaPackage::OriginEndpoint",
                    "Properties": {
                        "Id": endpoint_id,
                        "ChannelId": { "Ref": "PackageChannel" },
                        "HlsPackage": {
                            "SegmentDurationSeconds": 6,
                            "PlaylistWindowSeconds": 60,
                        },
                        "Tags": list_tags,
                    }
                },
                "LiveChannel": {
                    "Type": "AWS::MediaLive::Channel",
                    "Properties": {
                        "Name": channel_name,
                        "ChannelClass": "SINGLE_PIPELINE",
                        "RoleArn": props.media_live_service_role_arn,
                        "InputSpecification": {
                            "Codec": "AVC",
                            "Resolution": "HD",
                            "MaximumBitrate": "MAX_10_MBPS",
                        },
                        "InputAttachments": [{
                            "InputAttachmentName": "rtmp",
                            "InputId": { "Ref": "RtmpPushInput" },
                        }],
                        "Destinations": [{
                            "Id": "media-package",
                            "MediaPackageSettings": [{ "ChannelId": package_channel_id }],
                        }],
                        "EncoderSettings": encoder_settings(),
                        "Tags": map_tags,
                    },
                    "DependsOn": ["PackageChannel"]
                }
            },
            "Outputs": {
                "RtmpPushInputUri": {
                    "Value": { "Fn::Select": [0, { "Fn::GetAtt": ["RtmpPushInput", "Destinations"] }] }
                },
                "MediaLiveChannelId": { "Value": { "Ref": "LiveChannel" } },
                "HlsEndpointUrl": { "Value": { "Fn::GetAtt": ["HlsEndpoint", "Url"] } }
            }
        });

        Self {
            stack_name,
            description,
            tags,
            account: props.account.clone(),
            region: props.region.clone(),
            template,
        }
    }
}

/// One 720p rendition pushed to the MediaPackage destination
fn encoder_settings() -> Value {
    json!({
        "TimecodeConfig": { "Source": "EMBEDDED" },
        "AudioDescriptions": [{
            "Name": "audio_aac",
            "AudioSelectorName": "default",
            "CodecSettings": {
                "AacSettings": { "Bitrate": 128000, "SampleRate": 48000 }
            }
        }],
        "VideoDescriptions": [{
            "Name": "video_720p",
            "Width": 1280,
            "Height": 720,
            "CodecSettings": {
                "H264Settings": {
                    "Bitrate": 3000000,
                    "RateControlMode": "CBR",
                    "FramerateControl": "SPECIFIED",
                    "FramerateNumerator": 30,
                    "FramerateDenominator": 1,
                    "GopSize": 2,
                    "GopSizeUnits": "SECONDS"
                }
            }
        }],
        "OutputGroups": [{
            "Name": "media-package",
            "OutputGroupSettings": {
                "MediaPackageGroupSettings": {
                    "Destination": { "DestinationRefId": "media-package" }
                }
            },
            "Outputs": [{
                "OutputName": "720p",
                "VideoDescriptionName": "video_720p",
                "AudioDescriptionNames": ["audio_aac"],
                "OutputSettings": { "MediaPackageOutputSettings": {} }
            }]
        }]
    })
}
