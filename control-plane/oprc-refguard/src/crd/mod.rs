pub mod managed_cluster;
