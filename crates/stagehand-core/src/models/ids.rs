use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! id_type {
    ($($name:ident),+ $(,)?) => {
        $(
            #[derive(
                Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize,
            )]
            #[serde(transparent)]
            pub struct $name(pub i64);

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, "{}", self.0)
                }
            }
        )+
    };
}

id_type!(
    IssueId,
    PipelineId,
    StageId,
    TaskId,
    TaskRunId,
    TaskCheckRunId,
    InstanceId,
    DatabaseId,
    EnvironmentId,
    PrincipalId,
);

/// Principal used for every write the scheduler makes on its own behalf.
pub const SYSTEM_BOT: PrincipalId = PrincipalId(1);
