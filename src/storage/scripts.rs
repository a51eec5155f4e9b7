// 返回值：1 成功，-1 key 不存在，0 属于其他持有者

/// 比较并删除：KEYS[1] = key，ARGV[1] = token
pub const COMPARE_AND_DELETE: &str = r"
local current = redis.call('GET', KEYS[1])
if current == ARGV[1] then
    redis.call('DEL', KEYS[1])
    return 1
elseif current == false then
    return -1
end
return 0
";

/// 比较并续期：ARGV[2] = TTL 毫秒
pub const EXTEND_IF_OWNER: &str = r"
local current = redis.call('GET', KEYS[1])
if current == ARGV[1] then
    redis.call('PEXPIRE', KEYS[1], ARGV[2])
    return 1
elseif current == false then
    return -1
end
return 0
";
