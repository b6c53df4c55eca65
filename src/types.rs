use crate::iplist::IpList;

/// A tagged addition or deletion for one table, flowing from a [`crate::hostjob`]
/// loop to the add-stream or del-stream processor.
#[derive(Debug, Clone)]
pub struct UpdateMessage {
    pub table: String,
    pub ips: IpList,
}
