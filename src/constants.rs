// -
// Signal board sentinels

/// Sentinel file names under the shared board directory
pub(crate) const SIGNAL_LEASED: &str = "leased";
pub(crate) const SIGNAL_SETUP_SUCCESS: &str = "setup-success";
pub(crate) const SIGNAL_EXIT: &str = "exit";

// -
// Recovery scripts shipped on every control-plane host

pub(crate) const ETCD_BACKUP_SCRIPT: &str = "/usr/local/bin/etcd-snapshot-backup.sh";
pub(crate) const ETCD_RESTORE_SCRIPT: &str = "/usr/local/bin/etcd-snapshot-restore.sh";
pub(crate) const ETCD_MEMBER_RECOVER_SCRIPT: &str = "/usr/local/bin/etcd-member-recover.sh";

/// Where the backup step parks the snapshot on the first master
pub(crate) const ETCD_BACKUP_PATH: &str = "/root/assets/backup/snapshot.db";
/// Staged copy readable by the unprivileged ssh user
pub(crate) const ETCD_SNAPSHOT_STAGING: &str = "/tmp/snapshot.db";
/// On-disk member snapshot used by quorum-loss recovery
pub(crate) const ETCD_MEMBER_SNAP_DB: &str = "/root/assets/backup/etcd/member/snap/db";

// -
// Rollback drill marker

/// Fleet config object that writes the marker file
pub(crate) const ROLLBACK_MARKER_CONFIG: &str = "99-rollback-test";
/// Marker file checked on every master after restore
pub(crate) const ROLLBACK_MARKER_PATH: &str = "/etc/rollback-test";
pub(crate) const ROLLBACK_MARKER_BEFORE: &str = "A";
pub(crate) const ROLLBACK_MARKER_AFTER: &str = "B";

// -
// Cluster object addressing

pub(crate) const MASTER_NODE_SELECTOR: &str = "node-role.kubernetes.io/master=";
pub(crate) const MASTER_MACHINE_SELECTOR: &str = "machine.openshift.io/cluster-api-machine-role=master";
/// Node annotation pointing back at the owning machine object
pub(crate) const MACHINE_ANNOTATION: &str = "machine.openshift.io/machine";
pub(crate) const MACHINE_API_NAMESPACE: &str = "openshift-machine-api";
/// Pod running the machine controller; its node survives the meltdown
pub(crate) const MACHINE_CONTROLLER_SELECTOR: &str = "k8s-app=controller";

pub(crate) const MASTER_POOL: &str = "master";

pub(crate) const QUORUM_GUARD_NAMESPACE: &str = "openshift-machine-config-operator";
pub(crate) const QUORUM_GUARD_DEPLOYMENT: &str = "etcd-quorum-guard";

pub(crate) const SDN_NAMESPACE: &str = "openshift-sdn";
pub(crate) const SDN_POD_SELECTOR: &str = "app=sdn";

pub(crate) const ETCD_NAMESPACE: &str = "openshift-etcd";
pub(crate) const SIGNER_NAMESPACE: &str = "openshift-config";
pub(crate) const SIGNER_POD: &str = "etcd-signer";

pub(crate) const KUBE_APISERVER_NAMESPACE: &str = "openshift-kube-apiserver";
pub(crate) const OPENSHIFT_APISERVER_NAMESPACE: &str = "openshift-apiserver";
/// Label carried by the apiserver pods whose heap profiles teardown pulls
pub(crate) const API_COMPONENT_SELECTOR: &str = "openshift.io/component=api";

pub(crate) const SSH_BASTION_NAMESPACE: &str = "openshift-ssh-bastion";
pub(crate) const SSH_BASTION_SERVICE: &str = "ssh-bastion";

// -
// Artifact sub-directories under the collection root

pub(crate) const ARTIFACT_DIR_PODS: &str = "pods";
pub(crate) const ARTIFACT_DIR_NODES: &str = "nodes";
pub(crate) const ARTIFACT_DIR_METRICS: &str = "metrics";
pub(crate) const ARTIFACT_DIR_BOOTSTRAP: &str = "bootstrap";
pub(crate) const ARTIFACT_DIR_NETWORK: &str = "network";
pub(crate) const ARTIFACT_DIR_INSTALLER: &str = "installer";

/// Kubeconfig written by the installer, relative to the artifact root
pub(crate) const INSTALLER_KUBECONFIG: &str = "installer/auth/kubeconfig";
